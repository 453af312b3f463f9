// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Midlayer-facing types: the transfer descriptor, sense data, and the
//! INQUIRY views the completion path patches.

pub mod inquiry;
pub mod sense;
pub mod xfer;
