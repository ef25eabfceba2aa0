//! Database entities

pub mod host;
pub mod service_port;
pub mod tunnel;

pub use host::Entity as Host;
pub use service_port::Entity as ServicePort;
pub use tunnel::Entity as Tunnel;

pub mod prelude {
    pub use super::host::Entity as Host;
    pub use super::service_port::Entity as ServicePort;
    pub use super::tunnel::Entity as Tunnel;
}
