// # Avahi Name Service
//
// Publishes hostnames as CNAME records pointing at this machine through the
// Avahi daemon on the system D-Bus.
//
// ## Protocol
//
// - One entry group per hostname: `EntryGroupNew` → `AddRecord` → `Commit`
// - Records are CNAMEs (class IN, type CNAME) whose rdata is the host FQDN
//   in DNS wire format
// - `ResolveHostName` answers collision probes
// - `GetVersionString` doubles as the liveness ping
// - Entry-group `StateChanged` with state COLLISION or FAILURE becomes a
//   collision notice for the engine
//
// ## Sessions
//
// The bus connection is opened lazily by `ping`. A session is bound to the
// unique bus name that owned `org.freedesktop.Avahi` when it was opened.
// Any connectivity error, or a new owner (the daemon restarted), drops it;
// the next `ping` reconnects and reports a new session number, which tells
// the engine that Avahi forgot our groups.
//
// No retries here: the engine owns every retry decision.

pub mod proxy;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use mdns_core::config::NameServiceConfig;
use mdns_core::traits::{
    CollisionNotice, CollisionSender, GroupHandle, NameService, NameServiceFactory, ProbeOutcome,
    RecordId,
};
use mdns_core::{ComponentRegistry, Error, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use zbus::fdo;
use zbus::names::BusName;

use proxy::{
    AVAHI_SERVICE, AvahiEntryGroupProxy, AvahiServerProxy, COLLISION_ERROR, DNS_CLASS_IN,
    DNS_TYPE_CNAME, ENTRY_GROUP_COLLISION, ENTRY_GROUP_FAILURE, IF_UNSPEC, PROTO_UNSPEC,
    VANISHED_ERRORS,
};

/// Encode a domain name in DNS wire format (length-prefixed labels, zero terminator)
///
/// # Returns
///
/// - `Err(Error)`: a label is longer than 63 bytes or not ASCII
pub fn fqdn_to_rdata(fqdn: &str) -> Result<Vec<u8>> {
    let mut rdata = Vec::with_capacity(fqdn.len() + 2);

    for label in fqdn.split('.').filter(|label| !label.is_empty()) {
        if !label.is_ascii() || label.len() > 63 {
            return Err(Error::invalid_input(format!(
                "Cannot encode '{}' as a DNS label",
                label
            )));
        }
        rdata.push(label.len() as u8);
        rdata.extend_from_slice(label.as_bytes());
    }

    rdata.push(0);
    Ok(rdata)
}

/// Whether an entry-group state means the name was lost
pub fn is_collision_state(state: i32) -> bool {
    state == ENTRY_GROUP_COLLISION || state == ENTRY_GROUP_FAILURE
}

/// Whether a bus error name means the daemon left the bus
pub fn is_vanished_error(name: &str) -> bool {
    VANISHED_ERRORS.contains(&name)
}

/// Whether a session opened against `session_owner` outlived its daemon
///
/// `current` is the unique name now owning the Avahi service, `None` when
/// nobody owns it.
pub fn owner_changed(session_owner: &str, current: Option<&str>) -> bool {
    current != Some(session_owner)
}

/// Map a bus error to the engine's error kinds
fn classify(err: zbus::Error, context: &str) -> Error {
    match err {
        zbus::Error::MethodError(name, detail, _) if is_vanished_error(name.as_str()) => {
            Error::transport(format!(
                "{}: Avahi left the bus ({} {})",
                context,
                name.as_str(),
                detail.unwrap_or_default()
            ))
        }
        zbus::Error::FDO(e)
            if matches!(
                *e,
                fdo::Error::ServiceUnknown(_)
                    | fdo::Error::NoReply(_)
                    | fdo::Error::NameHasNoOwner(_)
            ) =>
        {
            Error::transport(format!("{}: Avahi left the bus ({})", context, e))
        }
        zbus::Error::MethodError(name, detail, _) => Error::name_service(format!(
            "{} rejected: {} {}",
            context,
            name.as_str(),
            detail.unwrap_or_default()
        )),
        other => Error::transport(format!("{}: {}", context, other)),
    }
}

/// Unique bus name currently owning the Avahi service
async fn avahi_owner(connection: &zbus::Connection) -> Result<Option<String>> {
    let dbus = fdo::DBusProxy::new(connection)
        .await
        .map_err(|e| Error::transport(format!("Bus daemon proxy: {}", e)))?;
    let name = BusName::try_from(AVAHI_SERVICE)
        .map_err(|e| Error::invalid_input(format!("{}: {}", AVAHI_SERVICE, e)))?;

    match dbus.get_name_owner(name).await {
        Ok(owner) => Ok(Some(owner.to_string())),
        Err(fdo::Error::NameHasNoOwner(_)) => Ok(None),
        Err(e) => Err(Error::transport(format!("GetNameOwner: {}", e))),
    }
}

/// One live connection to the daemon
struct Session {
    id: u64,
    owner: String,
    connection: zbus::Connection,
    server: AvahiServerProxy<'static>,
    fqdn: String,
    rdata: Vec<u8>,
    groups: HashMap<String, AvahiEntryGroupProxy<'static>>,
    watchers: HashMap<String, JoinHandle<()>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        for (_, watcher) in self.watchers.drain() {
            watcher.abort();
        }
    }
}

/// Name service backed by the Avahi daemon
pub struct AvahiNameService {
    session: Mutex<Option<Session>>,
    sessions: AtomicU64,
    sink: StdMutex<Option<CollisionSender>>,
}

impl AvahiNameService {
    /// Create a disconnected service; the first `ping` connects
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            sessions: AtomicU64::new(0),
            sink: StdMutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Session> {
        let connection = zbus::Connection::system()
            .await
            .map_err(|e| Error::transport(format!("Cannot connect to the system bus: {}", e)))?;
        let owner = avahi_owner(&connection)
            .await?
            .ok_or_else(|| Error::transport(format!("Avahi is not running (no owner of {})", AVAHI_SERVICE)))?;
        let server = AvahiServerProxy::new(&connection)
            .await
            .map_err(|e| classify(e, "Avahi server proxy"))?;

        let version = server
            .get_version_string()
            .await
            .map_err(|e| classify(e, "GetVersionString"))?;
        let fqdn = server
            .get_host_name_fqdn()
            .await
            .map_err(|e| classify(e, "GetHostNameFqdn"))?;
        let rdata = fqdn_to_rdata(&fqdn)?;

        let id = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Connected to {} ({}) as {} (session {})",
            version, owner, fqdn, id
        );

        Ok(Session {
            id,
            owner,
            connection,
            server,
            fqdn,
            rdata,
            groups: HashMap::new(),
            watchers: HashMap::new(),
        })
    }

    fn collision_sink(&self) -> Option<CollisionSender> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forward collision states of one group to the engine
    async fn watch_group(
        &self,
        group: &AvahiEntryGroupProxy<'static>,
        record: RecordId,
    ) -> Result<Option<JoinHandle<()>>> {
        let Some(sink) = self.collision_sink() else {
            return Ok(None);
        };

        let mut changes = group
            .receive_state_changed()
            .await
            .map_err(|e| classify(e, "StateChanged subscription"))?;

        Ok(Some(tokio::spawn(async move {
            while let Some(signal) = changes.next().await {
                let Ok(args) = signal.args() else {
                    continue;
                };
                let state = *args.state();
                if !is_collision_state(state) {
                    continue;
                }

                let notice = CollisionNotice::new(record.clone(), args.error().to_string());
                if sink.try_send(notice).is_err() {
                    warn!("Collision queue full, dropping notice for {}", record);
                }
            }
        })))
    }
}

impl Default for AvahiNameService {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop the session on connectivity errors so the next ping reconnects
fn forget_on_transport<T>(slot: &mut Option<Session>, result: Result<T>) -> Result<T> {
    if let Err(err) = &result
        && err.is_transport()
    {
        *slot = None;
    }
    result
}

fn connected(slot: &mut Option<Session>) -> Result<&mut Session> {
    slot.as_mut()
        .ok_or_else(|| Error::transport("Not connected to Avahi"))
}

#[async_trait]
impl NameService for AvahiNameService {
    async fn ping(&self) -> Result<u64> {
        let mut slot = self.session.lock().await;

        if let Some(session) = slot.as_ref() {
            match avahi_owner(&session.connection).await {
                Ok(owner) if !owner_changed(&session.owner, owner.as_deref()) => {
                    match session.server.get_version_string().await {
                        Ok(_) => return Ok(session.id),
                        Err(e) => warn!("Lost connection to Avahi: {}", e),
                    }
                }
                Ok(owner) => warn!(
                    "Avahi restarted ({} -> {}), its entry groups are gone",
                    session.owner,
                    owner.as_deref().unwrap_or("no owner")
                ),
                Err(e) => warn!("Lost connection to the system bus: {}", e),
            }
            *slot = None;
        }

        let session = self.connect().await?;
        let id = session.id;
        *slot = Some(session);
        Ok(id)
    }

    async fn probe(&self, hostname: &str) -> Result<ProbeOutcome> {
        let mut slot = self.session.lock().await;
        let session = connected(&mut slot)?;

        let response = session
            .server
            .resolve_host_name(IF_UNSPEC, PROTO_UNSPEC, hostname, PROTO_UNSPEC, 0)
            .await;

        let outcome = match response {
            Ok((_, _, owner, _, _, _)) if owner.eq_ignore_ascii_case(&session.fqdn) => {
                Ok(ProbeOutcome::OwnedBySelf)
            }
            Ok((_, _, owner, _, _, _)) => Ok(ProbeOutcome::OwnedBy(owner)),
            // Timeout or not-found: nobody answers for the name.
            Err(zbus::Error::MethodError(name, _, _)) if !is_vanished_error(name.as_str()) => {
                debug!("'{}' did not resolve ({})", hostname, name.as_str());
                Ok(ProbeOutcome::Available)
            }
            Err(e) => Err(classify(e, "ResolveHostName")),
        };

        forget_on_transport(&mut slot, outcome)
    }

    async fn create_group(&self) -> Result<GroupHandle> {
        let mut slot = self.session.lock().await;
        let session = connected(&mut slot)?;

        let created = async {
            let path = session
                .server
                .entry_group_new()
                .await
                .map_err(|e| classify(e, "EntryGroupNew"))?;
            let handle = GroupHandle::new(path.as_str());

            let group = AvahiEntryGroupProxy::builder(&session.connection)
                .path(path)
                .map_err(|e| classify(e, "EntryGroup path"))?
                .build()
                .await
                .map_err(|e| classify(e, "EntryGroup proxy"))?;

            session.groups.insert(handle.as_str().to_string(), group);
            Ok(handle)
        }
        .await;

        forget_on_transport(&mut slot, created)
    }

    async fn add_record(&self, group: &GroupHandle, hostname: &str, ttl: u32) -> Result<RecordId> {
        let mut slot = self.session.lock().await;
        let session = connected(&mut slot)?;

        let proxy = session
            .groups
            .get(group.as_str())
            .cloned()
            .ok_or_else(|| Error::name_service(format!("Unknown entry group {}", group)))?;

        let added = proxy
            .add_record(
                IF_UNSPEC,
                PROTO_UNSPEC,
                0,
                hostname,
                DNS_CLASS_IN,
                DNS_TYPE_CNAME,
                ttl,
                &session.rdata,
            )
            .await;

        let result = match added {
            Ok(()) => {
                let record = RecordId::new(group.as_str());
                match self.watch_group(&proxy, record.clone()).await {
                    Ok(Some(watcher)) => {
                        session.watchers.insert(group.as_str().to_string(), watcher);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Cannot watch entry group of '{}': {}", hostname, e),
                }
                Ok(record)
            }
            Err(zbus::Error::MethodError(name, detail, _)) if name.as_str() == COLLISION_ERROR => {
                Err(Error::collision(hostname, detail.unwrap_or_else(|| "name in use".to_string())))
            }
            Err(e) => Err(classify(e, "AddRecord")),
        };

        forget_on_transport(&mut slot, result)
    }

    async fn commit(&self, group: &GroupHandle) -> Result<()> {
        let mut slot = self.session.lock().await;
        let session = connected(&mut slot)?;

        let result = match session.groups.get(group.as_str()) {
            Some(proxy) => proxy.commit().await.map_err(|e| match e {
                zbus::Error::MethodError(name, detail, _) if name.as_str() == COLLISION_ERROR => {
                    Error::collision(group.as_str(), detail.unwrap_or_default())
                }
                other => classify(other, "Commit"),
            }),
            None => Err(Error::name_service(format!("Unknown entry group {}", group))),
        };

        forget_on_transport(&mut slot, result)
    }

    async fn reset(&self, group: &GroupHandle) -> Result<()> {
        let mut slot = self.session.lock().await;
        let session = connected(&mut slot)?;

        if let Some(watcher) = session.watchers.remove(group.as_str()) {
            watcher.abort();
        }

        let result = match session.groups.get(group.as_str()) {
            Some(proxy) => proxy.reset().await.map_err(|e| classify(e, "Reset")),
            None => Err(Error::name_service(format!("Unknown entry group {}", group))),
        };

        forget_on_transport(&mut slot, result)
    }

    async fn free_group(&self, group: &GroupHandle) -> Result<()> {
        let mut slot = self.session.lock().await;
        let session = connected(&mut slot)?;

        if let Some(watcher) = session.watchers.remove(group.as_str()) {
            watcher.abort();
        }

        let result = match session.groups.remove(group.as_str()) {
            Some(proxy) => proxy.free().await.map_err(|e| classify(e, "Free")),
            None => Ok(()),
        };

        forget_on_transport(&mut slot, result)
    }

    fn attach_collision_sink(&self, sink: CollisionSender) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    fn service_name(&self) -> &'static str {
        "avahi"
    }
}

/// Factory for creating Avahi name services
pub struct AvahiFactory;

impl NameServiceFactory for AvahiFactory {
    fn create(&self, config: &NameServiceConfig) -> Result<Box<dyn NameService>> {
        match config {
            NameServiceConfig::Avahi => Ok(Box::new(AvahiNameService::new())),
            _ => Err(Error::config("Invalid config for Avahi name service")),
        }
    }
}

/// Register the Avahi name service with a registry
pub fn register(registry: &ComponentRegistry) {
    registry.register_name_service("avahi", Box::new(AvahiFactory));
}
