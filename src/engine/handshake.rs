// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Attach-time initialization state machine.
//!
//! Runs exactly once, before any CCB is put into service:
//!
//! ```text
//! Start → BeginInit → VersionProbe(i) → QueryProps → FinishInit → Ready
//!                         │
//!                         ├─ accept → QueryProps
//!                         └─ reject → VersionProbe(i+1); list exhausted → Fail
//! ```
//!
//! Every request goes out under the reserved init request id with the
//! request-completion flag; the reply lands in the adapter's single
//! reply slot.  Only one handshake command is ever in flight.

use anyhow::{Result, bail};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::{
    engine::{Adapter, Negotiated, lock},
    models::{
        opcode::CommandOp,
        props::ChannelProps,
        slot::{CommandSlot, INIT_RID},
        version::{CmdVersion, PROTO_VERSION_WIN8, PROTO_VERSIONS},
    },
    vmbus::{ChannelError, PacketFlags, PacketType},
};

enum ConnectState {
    BeginInit,
    VersionProbe(usize),
    QueryProps,
    FinishInit,
}

enum Transition {
    Next(ConnectState),
    Done,
}

impl Adapter {
    pub(crate) async fn connect(&self) -> Result<Negotiated> {
        let mut proto: u16 = 0;
        let mut props = ChannelProps::default();

        let mut state = ConnectState::BeginInit;
        loop {
            let tr = match state {
                ConnectState::BeginInit => {
                    self.begin_init().await?;
                    Transition::Next(ConnectState::VersionProbe(0))
                },
                ConnectState::VersionProbe(i) => match self.probe_version(i).await? {
                    Some(accepted) => {
                        proto = accepted;
                        Transition::Next(ConnectState::QueryProps)
                    },
                    None => Transition::Next(ConnectState::VersionProbe(i + 1)),
                },
                ConnectState::QueryProps => {
                    props = self.query_props().await?;
                    Transition::Next(ConnectState::FinishInit)
                },
                ConnectState::FinishInit => {
                    self.finish_init().await?;
                    Transition::Done
                },
            };
            match tr {
                Transition::Next(next) => state = next,
                Transition::Done => break,
            }
        }

        Ok(Negotiated {
            proto,
            xio: proto >= PROTO_VERSION_WIN8,
            bus: props.path,
            initiator: props.target,
            props,
        })
    }

    async fn begin_init(&self) -> Result<()> {
        let resp = self
            .run_init_cmd(&CommandSlot::request(CommandOp::StartInit))
            .await?;
        let hdr = resp.header();
        if hdr.opcode() != Some(CommandOp::IoDone) || hdr.status() != 0 {
            bail!("failed to initialize, status {:#x}", hdr.status());
        }
        Ok(())
    }

    /// Probe one entry of the version list.  `Some(version)` means the
    /// host took it; `None` means try the next one.
    async fn probe_version(&self, i: usize) -> Result<Option<u16>> {
        let Some(&ver) = PROTO_VERSIONS.get(i) else {
            bail!("failed to negotiate protocol version");
        };

        let mut slot = CommandSlot::zeroed();
        *slot.version_mut() = CmdVersion::probe(ver);

        let resp = self.run_init_cmd(&slot).await?;
        let hdr = resp.header();
        if hdr.opcode() != Some(CommandOp::IoDone) {
            bail!("failed to negotiate protocol, status {:#x}", hdr.status());
        }
        if hdr.status() == 0 {
            return Ok(Some(ver));
        }
        debug!(ver = format_args!("{ver:#x}"), "version rejected");
        Ok(None)
    }

    async fn query_props(&self) -> Result<ChannelProps> {
        let resp = self
            .run_init_cmd(&CommandSlot::request(CommandOp::QueryProps))
            .await?;
        let hdr = resp.header();
        if hdr.opcode() != Some(CommandOp::IoDone) || hdr.status() != 0 {
            bail!(
                "failed to obtain channel properties, status {:#x}",
                hdr.status()
            );
        }

        let props = resp.props().props;
        debug!(
            proto = format_args!("{:#x}", props.proto.get()),
            path = props.path,
            target = props.target,
            maxchan = props.maxchan.get(),
            port = props.port.get(),
            chflags = format_args!("{:#x}", props.chflags.get()),
            maxfer = props.maxfer.get(),
            chanid = format_args!("{:#x}", props.chanid.get()),
            "channel properties"
        );
        Ok(props)
    }

    async fn finish_init(&self) -> Result<()> {
        let resp = self
            .run_init_cmd(&CommandSlot::request(CommandOp::FinishInit))
            .await?;
        let hdr = resp.header();
        if hdr.opcode() != Some(CommandOp::IoDone) || hdr.status() != 0 {
            bail!("failed to finish initialization, status {:#x}", hdr.status());
        }
        Ok(())
    }

    /// Send one init command and wait for its reply in the reply slot.
    ///
    /// The send is retried while the ring is full, a tick apart; any
    /// other channel error is fatal to attach.  The wait is bounded so a
    /// mute host cannot hang attach forever.
    async fn run_init_cmd(&self, slot: &CommandSlot) -> Result<CommandSlot> {
        let op = slot.header().op_raw();

        let mut tries = self.cfg.handshake.send_retries;
        loop {
            match self.chan.send(
                slot.bytes(),
                INIT_RID,
                PacketType::Inband,
                PacketFlags::REQUEST_COMPLETION,
            ) {
                Ok(()) => break,
                Err(ChannelError::Again) if tries > 1 => {
                    tries -= 1;
                    sleep(self.cfg.handshake.retry_tick()).await;
                },
                Err(e) => {
                    debug!(op, error = %e, "init command send error");
                    return Err(anyhow::Error::new(e)
                        .context(format!("failed to send operation {op}")));
                },
            }
        }

        if timeout(
            self.cfg.handshake.timeout(),
            self.init_reply.notify.notified(),
        )
        .await
        .is_err()
        {
            warn!(op, "operation timed out");
            bail!("operation {op} timed out");
        }

        Ok(*lock(&self.init_reply.slot))
    }
}
