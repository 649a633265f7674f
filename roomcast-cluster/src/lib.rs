pub mod error;
pub mod sync;

pub use error::{Error, Result};
pub use sync::{Broker, BrokerConfig, BrokerStats, Event, EventReceiver, LocalBroker, SendOutcome};
