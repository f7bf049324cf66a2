use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Handler<T>)>,
}

impl<T> Registry<T> {
    fn remove(&mut self, id: u64) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64);
}

impl<T: 'static> Detach for Mutex<Registry<T>> {
    fn detach(&self, id: u64) {
        recover(self.lock()).remove(id);
    }
}

fn recover<'a, T>(result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

/// Dynamic listener registration with token-scoped detach.
///
/// Every attach hands back a [`SubscriptionToken`]; dropping the token is
/// the one and only detach path, so holding tokens in the owning component
/// guarantees a matching detach on every exit path.
///
/// Handlers run without the registry lock held, so a handler may freely
/// subscribe or detach (including dropping its own token) while an emit is
/// in flight.
pub struct Listeners<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Listeners<T> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Attach a handler and return the token that detaches it.
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionToken {
        let mut registry = recover(self.registry.lock());
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.push((id, Arc::new(handler)));

        SubscriptionToken {
            id,
            registry: Arc::downgrade(&self.registry) as Weak<dyn Detach>,
        }
    }

    /// Deliver one value to every attached handler, in attach order.
    pub fn emit(&self, value: &T) {
        let handlers: Vec<Handler<T>> = recover(self.registry.lock())
            .entries
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            handler.as_ref()(value);
        }
    }

    /// Number of currently attached handlers.
    pub fn len(&self) -> usize {
        recover(self.registry.lock()).entries.len()
    }

    /// Whether no handler is attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped handle for one attached listener; detaches on drop.
pub struct SubscriptionToken {
    id: u64,
    registry: Weak<dyn Detach>,
}

impl SubscriptionToken {
    /// Detach eagerly. Equivalent to dropping the token.
    pub fn detach(self) {}
}

impl Drop for SubscriptionToken {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(self.id);
        }
    }
}

impl std::fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionToken")
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn delivers_to_every_listener() {
        let bus = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));

        let a = {
            let count = Arc::clone(&count);
            bus.subscribe(move |value: &u32| {
                count.fetch_add(*value as usize, Ordering::SeqCst);
            })
        };
        let b = {
            let count = Arc::clone(&count);
            bus.subscribe(move |value: &u32| {
                count.fetch_add(*value as usize, Ordering::SeqCst);
            })
        };

        bus.emit(&3);
        assert_eq!(count.load(Ordering::SeqCst), 6);
        drop(a);
        drop(b);
    }

    #[test]
    fn dropping_the_token_detaches() {
        let bus = Listeners::new();
        let count = Arc::new(AtomicUsize::new(0));

        let token = {
            let count = Arc::clone(&count);
            bus.subscribe(move |_: &()| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(bus.len(), 1);

        drop(token);
        assert!(bus.is_empty());

        bus.emit(&());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_may_detach_another_during_emit() {
        let bus: Arc<Listeners<()>> = Arc::new(Listeners::new());
        let victim = Arc::new(Mutex::new(None::<SubscriptionToken>));

        let killer = {
            let victim = Arc::clone(&victim);
            bus.subscribe(move |_| {
                victim.lock().expect("victim slot").take();
            })
        };
        let token = bus.subscribe(|_| {});
        *victim.lock().expect("victim slot") = Some(token);

        bus.emit(&());
        assert_eq!(bus.len(), 1);
        drop(killer);
    }

    #[test]
    fn token_outliving_the_registry_is_harmless() {
        let token = {
            let bus: Listeners<u8> = Listeners::new();
            bus.subscribe(|_| {})
        };
        drop(token);
    }
}
