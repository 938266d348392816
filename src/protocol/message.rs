//! Protocol messages

use std::fmt;

use crate::memory::{Address, Word};
use crate::topology::{ChipId, NodeId};

pub type MessageId = u64;

/// Sender or receiver of a message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Node(NodeId),
    Bus,
    Directory,
    Memory,
}

impl Endpoint {
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Endpoint::Node(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Node(id) => write!(f, "P{}", id),
            Endpoint::Bus => f.write_str("bus"),
            Endpoint::Directory => f.write_str("directory"),
            Endpoint::Memory => f.write_str("memory"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    // Snooping bus transactions
    BusRd,
    BusRdX,
    BusUpgr,
    Flush,
    FlushOpt,
    // Intra-chip
    L1Read,
    L1Write,
    L2Data,
    L2Ack,
    L1Inv,
    L1Downgrade,
    // Inter-chip
    DirGets,
    DirGetx,
    DirData,
    DirFwdGets,
    DirFwdGetx,
    DirInv,
    DirAck,
    DirWb,
    ChipData,
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::BusRd => "BusRd",
            MessageKind::BusRdX => "BusRdX",
            MessageKind::BusUpgr => "BusUpgr",
            MessageKind::Flush => "Flush",
            MessageKind::FlushOpt => "FlushOpt",
            MessageKind::L1Read => "L1_READ",
            MessageKind::L1Write => "L1_WRITE",
            MessageKind::L2Data => "L2_DATA",
            MessageKind::L2Ack => "L2_ACK",
            MessageKind::L1Inv => "L1_INV",
            MessageKind::L1Downgrade => "L1_DOWNGRADE",
            MessageKind::DirGets => "DIR_GETS",
            MessageKind::DirGetx => "DIR_GETX",
            MessageKind::DirData => "DIR_DATA",
            MessageKind::DirFwdGets => "DIR_FWD_GETS",
            MessageKind::DirFwdGetx => "DIR_FWD_GETX",
            MessageKind::DirInv => "DIR_INV",
            MessageKind::DirAck => "DIR_ACK",
            MessageKind::DirWb => "DIR_WB",
            MessageKind::ChipData => "CHIP_DATA",
        }
    }

    /// Data responses that install a line at their destination
    pub fn is_data_response(&self) -> bool {
        matches!(
            self,
            MessageKind::L2Data | MessageKind::DirData | MessageKind::ChipData
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Chip-level routing of a Piranha message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChipRoute {
    pub from_chip: ChipId,
    pub to_chip: ChipId,
}

impl ChipRoute {
    pub fn make(from_chip: ChipId, to_chip: ChipId) -> Self {
        Self { from_chip, to_chip }
    }

    pub fn is_inter_chip(&self) -> bool {
        self.from_chip != self.to_chip
    }
}

/// A message as emitted by a protocol handler, before the engine
/// assigns it an id and a timestamp
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub kind: MessageKind,
    pub from: Endpoint,
    pub to: Endpoint,
    pub address: Address,
    /// Line value, or the pending write value on a request
    pub data: Option<Word>,
    /// Original requester of a forwarded request
    pub requester: Option<NodeId>,
    /// Set on data responses that grant write ownership
    pub exclusive: bool,
    pub route: Option<ChipRoute>,
}

impl Packet {
    pub fn make(
        kind: MessageKind,
        from: Endpoint,
        to: Endpoint,
        address: Address,
    ) -> Self {
        Self {
            kind,
            from,
            to,
            address,
            data: None,
            requester: None,
            exclusive: false,
            route: None,
        }
    }

    pub fn with_data(mut self, data: Option<Word>) -> Self {
        self.data = data;
        self
    }

    pub fn with_requester(mut self, requester: NodeId) -> Self {
        self.requester = Some(requester);
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn routed(mut self, from_chip: ChipId, to_chip: ChipId) -> Self {
        self.route = Some(ChipRoute::make(from_chip, to_chip));
        self
    }

    /// Stamp the packet into an in-flight message
    pub fn into_message(self, id: MessageId, timestamp: u64) -> Message {
        Message {
            id,
            kind: self.kind,
            from: self.from,
            to: self.to,
            address: self.address,
            data: self.data,
            requester: self.requester,
            exclusive: self.exclusive,
            timestamp,
            progress: 0.0,
            route: self.route,
        }
    }
}

/// One in-flight protocol transaction
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub from: Endpoint,
    pub to: Endpoint,
    pub address: Address,
    pub data: Option<Word>,
    pub requester: Option<NodeId>,
    pub exclusive: bool,
    pub timestamp: u64,
    /// Delivery progress in `[0, 1]`, left for renderers to animate
    pub progress: f32,
    pub route: Option<ChipRoute>,
}

impl Message {
    pub fn is_inter_chip(&self) -> bool {
        self.route.is_some_and(|route| route.is_inter_chip())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} -> {} @{:#x}",
            self.id, self.kind, self.from, self.to, self.address
        )?;
        if let Some(data) = self.data {
            write!(f, " data={}", data)?;
        }
        if let Some(route) = self.route {
            write!(f, " chip {} -> {}", route.from_chip, route.to_chip)?;
        }
        Ok(())
    }
}
