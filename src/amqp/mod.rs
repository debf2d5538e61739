//! Helpers for connecting to a rabbitmq broker

mod broker;
pub mod configuration;
mod connection;
mod delivery;
mod factory;

pub use broker::{BrokerChannel, BrokerConnection, DeliveryStream, Dialer};
pub use connection::AmqpConnection;
pub use delivery::{Acknowledger, Delivery};
pub use factory::ConnectionFactory;

pub use lapin::publisher_confirm::Confirmation;
pub use lapin::{options, types, BasicProperties, ExchangeKind};
