//! D-Bus proxies for the parts of the Avahi API we use

use zbus::proxy;
use zbus::zvariant::OwnedObjectPath;

/// Well-known bus name of the Avahi daemon
pub const AVAHI_SERVICE: &str = "org.freedesktop.Avahi";

/// Any interface
pub const IF_UNSPEC: i32 = -1;
/// Any protocol (IPv4 or IPv6)
pub const PROTO_UNSPEC: i32 = -1;

/// DNS class IN
pub const DNS_CLASS_IN: u16 = 1;
/// DNS type CNAME
pub const DNS_TYPE_CNAME: u16 = 5;

/// Entry-group state: another host holds one of the names
pub const ENTRY_GROUP_COLLISION: i32 = 3;
/// Entry-group state: registration failed
pub const ENTRY_GROUP_FAILURE: i32 = 4;

/// Error name returned by `AddRecord`/`Commit` for taken names
pub const COLLISION_ERROR: &str = "org.freedesktop.Avahi.CollisionError";

/// Bus errors meaning the daemon is gone rather than refusing a request
pub const VANISHED_ERRORS: [&str; 3] = [
    "org.freedesktop.DBus.Error.ServiceUnknown",
    "org.freedesktop.DBus.Error.NoReply",
    "org.freedesktop.DBus.Error.NameHasNoOwner",
];

#[proxy(
    interface = "org.freedesktop.Avahi.Server",
    default_service = "org.freedesktop.Avahi",
    default_path = "/"
)]
pub trait AvahiServer {
    /// Daemon version; used as a cheap liveness check
    fn get_version_string(&self) -> zbus::Result<String>;

    /// Fully qualified local host name (e.g. `nas.local`)
    fn get_host_name_fqdn(&self) -> zbus::Result<String>;

    /// Create an empty entry group and return its object path
    fn entry_group_new(&self) -> zbus::Result<OwnedObjectPath>;

    /// Resolve a host name on the local network
    fn resolve_host_name(
        &self,
        interface: i32,
        protocol: i32,
        name: &str,
        aprotocol: i32,
        flags: u32,
    ) -> zbus::Result<(i32, i32, String, i32, String, u32)>;
}

#[proxy(
    interface = "org.freedesktop.Avahi.EntryGroup",
    default_service = "org.freedesktop.Avahi"
)]
pub trait AvahiEntryGroup {
    #[allow(clippy::too_many_arguments)]
    fn add_record(
        &self,
        interface: i32,
        protocol: i32,
        flags: u32,
        name: &str,
        clazz: u16,
        type_: u16,
        ttl: u32,
        rdata: &[u8],
    ) -> zbus::Result<()>;

    fn commit(&self) -> zbus::Result<()>;

    fn reset(&self) -> zbus::Result<()>;

    fn free(&self) -> zbus::Result<()>;

    #[zbus(signal)]
    fn state_changed(&self, state: i32, error: &str) -> zbus::Result<()>;
}
