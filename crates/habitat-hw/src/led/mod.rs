//! LED panel module.
//!
//! Provides control over arrays of DAC5578-driven LED panels.

mod driver;
mod panel;

pub use driver::{ChannelMap, LedPanelArray, PanelProperties};
pub use panel::{Panel, PanelConfig};
