// Module: sync

pub mod broker;
pub mod connection;
pub mod events;
pub mod group_index;
pub mod local_broker;
pub mod registry;
pub mod relay;

pub use broker::{generate_node_id, Broker, BrokerConfig, BrokerStats, SendOutcome};
pub use connection::{Connection, EventReceiver};
pub use events::{Event, CONNECTED_EVENT, PING_EVENT};
pub use group_index::GroupIndex;
pub use local_broker::{GroupListener, LocalBroker};
pub use registry::ConnectionRegistry;
pub use relay::{RedisRelay, RelayConfig, RelayEnvelope, RelayStatus, RelaySubscriptions};
