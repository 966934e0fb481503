//! Chat rooms: storage, the embedded message ledger, read projections,
//! random matchmaking and the live feed relay.

pub mod ledger;
pub mod matcher;
pub mod model;
pub mod projector;
pub mod relay;
pub mod store;

pub use ledger::MessageLedger;
pub use matcher::{LeaveOutcome, MatchCoordinator};
pub use model::{Message, NewRoom, Room, RoomPatch};
pub use projector::{MemberProfile, RoomDetail, RoomProjector};
pub use relay::FeedView;
pub use store::RoomStore;
