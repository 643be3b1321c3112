//! Execution hosts that feed the coordinator.
//!
//! - [`UiDispatcher`] runs work items on one cooperative thread and raises
//!   escaping panics on `UiThreadDispatch`.
//! - [`spawn_observed`] runs a closure on a new thread and raises escaping
//!   panics on `BackgroundThreadUnhandled`.
//!
//! Both rely on the panic capture hook from [`install_panic_capture`] to
//! attach the stack of the panic site to the record.

mod background;
mod panic;
mod ui;

pub use background::spawn_observed;
pub use panic::{PanicSite, install_panic_capture, observe, peek_panic_location, take_panic_site};
pub use ui::{FatalFault, UiDispatcher, UiHandle};
