pub mod config;
pub mod correlator;
pub mod diag;
pub mod frame;
pub mod history;
pub mod link;
pub mod monitor;
pub mod mutator;
pub mod transmitter;
pub mod worker;

pub use config::FrayConfig;
pub use correlator::Correlator;
pub use diag::{ChannelError, CommandChannel, DiagnosticChannel, device_ip};
pub use frame::{Frame, FrameError, FrameTemplate, MacAddr};
pub use history::{AnomalyKind, AnomalyRecord, History, PacketRecord};
pub use link::{LinkError, LinkSender, UdpLinkSender};
pub use monitor::{Baseline, HealthMonitor, ParseError};
pub use mutator::{Mutator, RandomBitFlipMutator, flip_count};
pub use transmitter::Transmitter;
pub use worker::{CancelToken, Worker, WorkerHandle, sleep_cancellable, spawn};
