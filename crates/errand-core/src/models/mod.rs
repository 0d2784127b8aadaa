//! Data models for errand entities.
//!
//! This module contains the wire types exchanged with the errand API:
//!
//! - `UserIdentity`, `Profile`: the signed-in user as reported by the users API
//! - `Task`, `Priority`: to-do items
//! - `Appointment`: calendar entries with contact attendees
//! - `Contact`: address book entries
//!
//! Every collection type also has a `*Draft` (create) and `*Patch` (partial
//! update) companion whose unset fields are omitted from the request body.

pub mod appointment;
pub mod contact;
pub mod task;
pub mod user;

pub use appointment::{Appointment, AppointmentDraft, AppointmentPatch};
pub use contact::{Contact, ContactDraft, ContactPatch};
pub use task::{Priority, Task, TaskDraft, TaskPatch};
pub use user::{AuthStatus, Profile, UserIdentity};
