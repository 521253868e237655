//! Pages controlled (or controllable) by a worker.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::lifecycle::ServiceWorkerId;
use crate::ServiceWorkerError;

// ==================== Client ====================

/// A client (page or worker).
#[derive(Debug, Clone)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Worker currently controlling this client.
    pub controller: Option<ServiceWorkerId>,

    /// Number of reloads triggered by the host.
    pub reloads: u32,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    All,
}

impl Client {
    /// Focus the client.
    pub fn focus(&mut self) -> Result<(), ServiceWorkerError> {
        if self.client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }
        self.focused = true;
        Ok(())
    }

    /// Navigate client to URL.
    pub fn navigate(&mut self, url: Url) -> Result<(), ServiceWorkerError> {
        if self.client_type != ClientType::Window {
            return Err(ServiceWorkerError::StateError(
                "Can only navigate window clients".to_string(),
            ));
        }
        self.url = url;
        Ok(())
    }

    pub fn is_controlled(&self) -> bool {
        self.controller.is_some()
    }
}

// ==================== Clients ====================

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// Every client known to the host.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    /// Match all clients. Without `include_uncontrolled`, only clients with a
    /// controller are returned.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.is_controlled())
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Open a focused, uncontrolled window client.
    pub fn open_window(&mut self, url: Url) -> Client {
        for client in self.clients.values_mut() {
            client.focused = false;
        }

        let client = Client {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            focused: true,
            controller: None,
            reloads: 0,
        };

        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Take control of every client inside `scope` that is not already
    /// controlled by `worker`. A client that also falls inside a longer scope
    /// in `other_scopes` belongs to that registration and is left alone.
    /// Returns the IDs that changed controller.
    pub fn claim(&mut self, worker: ServiceWorkerId, scope: &Url, other_scopes: &[Url]) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| in_scope(&c.url, scope))
            .filter(|c| {
                !other_scopes
                    .iter()
                    .any(|s| s.path().len() > scope.path().len() && in_scope(&c.url, s))
            })
            .filter(|c| c.controller != Some(worker))
            .map(|c| {
                c.controller = Some(worker);
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }

    /// Drop control by any of `workers`; used when a registration goes away.
    pub fn release(&mut self, workers: &[ServiceWorkerId]) {
        for client in self.clients.values_mut() {
            if client.controller.is_some_and(|id| workers.contains(&id)) {
                client.controller = None;
            }
        }
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn in_scope(url: &Url, scope: &Url) -> bool {
    url.origin() == scope.origin() && url.path().starts_with(scope.path())
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:04}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse("https://example.com/").unwrap().join(path).unwrap()
    }

    #[test]
    fn test_open_window_takes_focus() {
        let mut clients = Clients::new();
        let first = clients.open_window(url("/dashboard"));
        let second = clients.open_window(url("/tickets"));

        assert_eq!(second.client_type, ClientType::Window);
        assert!(!clients.get(&first.id).unwrap().focused);
        assert!(clients.get(&second.id).unwrap().focused);
    }

    #[test]
    fn test_claim_respects_scope() {
        let mut clients = Clients::new();
        let main = clients.open_window(url("/dashboard"));
        let portal = clients.open_window(url("/portal/home"));
        let worker = ServiceWorkerId::for_tests(7);

        let changed = clients.claim(worker, &url("/portal/"), &[]);
        assert_eq!(changed, vec![portal.id.clone()]);
        assert!(!clients.get(&main.id).unwrap().is_controlled());

        // Claiming again changes nothing.
        assert!(clients.claim(worker, &url("/portal/"), &[]).is_empty());
    }

    #[test]
    fn test_claim_leaves_pages_of_nested_scopes() {
        let mut clients = Clients::new();
        let main = clients.open_window(url("/dashboard"));
        let portal = clients.open_window(url("/portal/home"));
        let portal_worker = ServiceWorkerId::for_tests(1);
        let main_worker = ServiceWorkerId::for_tests(2);
        clients.claim(portal_worker, &url("/portal/"), &[url("/")]);

        let changed = clients.claim(main_worker, &url("/"), &[url("/portal/")]);
        assert_eq!(changed, vec![main.id.clone()]);
        assert_eq!(clients.get(&portal.id).unwrap().controller, Some(portal_worker));
    }

    #[test]
    fn test_match_all_filters_uncontrolled() {
        let mut clients = Clients::new();
        let a = clients.open_window(url("/a"));
        clients.open_window(url("/b"));
        clients.get_mut(&a.id).unwrap().controller = Some(ServiceWorkerId::for_tests(1));

        assert_eq!(clients.match_all(&ClientMatchOptions::default()).len(), 1);
        let all = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::All,
        };
        assert_eq!(clients.match_all(&all).len(), 2);
    }

    #[test]
    fn test_release() {
        let mut clients = Clients::new();
        let a = clients.open_window(url("/a"));
        let worker = ServiceWorkerId::for_tests(3);
        clients.claim(worker, &url("/"), &[]);
        clients.release(&[worker]);
        assert!(!clients.get(&a.id).unwrap().is_controlled());
    }

    #[test]
    fn test_worker_clients_cannot_navigate() {
        let mut client = Client {
            id: "w".to_string(),
            url: url("/worker.js"),
            client_type: ClientType::Worker,
            focused: false,
            controller: None,
            reloads: 0,
        };
        assert!(client.navigate(url("/x")).is_err());
        assert!(client.focus().is_err());
    }
}
