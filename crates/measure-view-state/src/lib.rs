//! Presentation state for measurement screens.
//!
//! [`MeasurementViewModel`] keeps one repository subscription for the life of
//! a UI context and republishes it as a [`ViewState`] on a `watch` channel.
//! User intents go through the repository; the view model never touches
//! storage itself.

mod view_model;

pub use view_model::{MeasurementViewModel, ViewState};
