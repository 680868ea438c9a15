use crate::protocol::{Format, ParamUpdate, ParamValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Change callback registered against one parameter name. Listeners take no
/// payload; they re-read the store for the current value.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Token returned by [`ParameterStore::add_listener`]; callbacks cannot be
/// compared, so removal goes by token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct StoreState {
    values: HashMap<String, ParamValue>,
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
    subscriptions: HashMap<String, Format>,
    next_listener: u64,
}

/// Latest-known value per parameter, plus the listener and subscription
/// registries.
///
/// Shared by the caller's context and both inbound loops; one value slot per
/// name, so a later update in a different format overwrites outright. The
/// subscription map is client-side bookkeeping only; the device's actual
/// subscription state is never verified.
#[derive(Clone)]
pub struct ParameterStore {
    state: Arc<Mutex<StoreState>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                values: HashMap::new(),
                listeners: HashMap::new(),
                subscriptions: HashMap::new(),
                next_listener: 0,
            })),
        }
    }

    /// Latest known value, or `None` if the device has never reported one.
    pub fn get_value(&self, param: &str) -> Option<ParamValue> {
        self.state.lock().unwrap().values.get(param).cloned()
    }

    /// Store an inbound update and notify that parameter's listeners.
    ///
    /// An update that names a parameter without carrying a value still
    /// notifies, it just leaves the stored value untouched. Callbacks run
    /// after the lock is released, so a listener may re-read the store or
    /// edit the registry without deadlocking.
    pub fn apply(&self, update: ParamUpdate) {
        let to_notify: Vec<Listener> = {
            let mut state = self.state.lock().unwrap();
            if let Some(value) = update.value {
                state.values.insert(update.param.clone(), value);
            }
            state
                .listeners
                .get(&update.param)
                .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default()
        };

        for listener in to_notify {
            listener();
        }
    }

    /// Register a change callback for one parameter.
    pub fn add_listener(
        &self,
        param: impl Into<String>,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> ListenerId {
        let mut state = self.state.lock().unwrap();
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state
            .listeners
            .entry(param.into())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Drop a registered callback. Removing an unknown listener is a no-op.
    pub fn remove_listener(&self, param: &str, id: ListenerId) {
        let mut state = self.state.lock().unwrap();
        if let Some(entries) = state.listeners.get_mut(param) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                state.listeners.remove(param);
            }
        }
    }

    /// Record that the device has been asked to push this parameter.
    pub fn record_subscription(&self, param: impl Into<String>, fmt: Format) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(param.into(), fmt);
    }

    /// Forget a recorded subscription. Unknown names are a no-op.
    pub fn remove_subscription(&self, param: &str) {
        self.state.lock().unwrap().subscriptions.remove(param);
    }

    pub fn is_subscribed(&self, param: &str) -> bool {
        self.state.lock().unwrap().subscriptions.contains_key(param)
    }

    /// Snapshot of every recorded subscription, for replay after reconnect.
    pub fn subscriptions(&self) -> Vec<(String, Format)> {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .iter()
            .map(|(param, fmt)| (param.clone(), *fmt))
            .collect()
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}
