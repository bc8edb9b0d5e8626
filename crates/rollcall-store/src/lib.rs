//! rollcall-store: Persistence for administrator credentials and attendance.
//!
//! Credentials live in a single SQLite relation; attendance is a CSV table
//! (Name, Time, Date) rewritten atomically on every new row.

pub mod attendance;
pub mod credentials;

pub use attendance::{AttendanceError, AttendanceLog, AttendanceRecord, MarkedSet};
pub use credentials::{CredentialError, CredentialStore};
