#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
mod controller;
mod kubeclient;
mod reconciler;
mod resource;

pub use controller::Manager;
pub use resource::{TrafficSplit, TrafficSplitBackend, TrafficSplitSpec};
