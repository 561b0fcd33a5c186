//! WasteWise dispatch
//!
//! The pickup state machine and the driver assignment workflow, gated by the
//! subscription and usage ledger in `wastewise-billing`.

pub mod error;
pub mod requests;
pub mod scope;
pub mod service;
pub mod state_machine;

pub use error::{DispatchError, DispatchResult};
pub use requests::{
    AssignDriverRequest, CancelPickupRequest, CompletePickupRequest, CreatePickupRequest,
    PickupFilter, RejectPickupRequest, ReschedulePickupRequest, ValidatedPickup, WEIGHT_MAX_KG,
};
pub use scope::{Actor, ViewerScope};
pub use service::PickupService;
