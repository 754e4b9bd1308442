//! Bridge between Energomera CE301/CE303 energy meters and an MQTT broker.
//!
//! Readings are taken over the IEC 62056-21 serial protocol and published
//! with Home Assistant discovery metadata, so the meter shows up as a
//! device with one sensor per configured parameter.

pub mod config;
pub mod meter;
pub mod mqtt;
pub mod resolver;
pub mod scheduler;
pub mod template;

pub use config::Config;
pub use meter::serial::SerialMeterClient;
pub use mqtt::MqttPublisher;
pub use scheduler::CycleScheduler;
