//! Core domain types shared across the service

pub mod instrument;
pub mod market;

pub use instrument::{InstrumentKey, OptionType};
pub use market::{convert_currency, Bar, Price, Tick};
