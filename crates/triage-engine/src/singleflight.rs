//! Single-flight coordination.
//!
//! [`SingleFlight`] collapses concurrent work for the same key into one
//! execution. The first caller for a key becomes the owner and receives an
//! [`OwnerGuard`]; everyone arriving while the owner is running receives the
//! same [`Ticket`] and waits for the owner's outcome.
//!
//! A ticket is a one-shot, multi-observer result cell. It is settled at most
//! once, either with the owner's outcome or as abandoned when the owner is
//! dropped without publishing. The table entry for a key is removed as soon
//! as its owner finishes, so tickets never outlive the work they represent.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Settlement state of a ticket.
#[derive(Debug, Clone)]
enum FlightState<T> {
    Pending,
    Resolved(T),
    Abandoned,
}

impl<T: Clone> FlightState<T> {
    const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    fn settled(&self) -> Option<T> {
        match self {
            Self::Resolved(value) => Some(value.clone()),
            Self::Pending | Self::Abandoned => None,
        }
    }
}

/// Shared handle on the outcome of one in-flight computation.
#[derive(Debug)]
pub struct Ticket<T> {
    state: watch::Sender<FlightState<T>>,
}

impl<T: Clone> Ticket<T> {
    fn new() -> Self {
        let (state, _) = watch::channel(FlightState::Pending);
        Self { state }
    }

    /// Publishes the outcome. Returns false if the ticket was already settled.
    pub fn resolve(&self, outcome: T) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_pending() {
                *state = FlightState::Resolved(outcome);
                true
            } else {
                false
            }
        })
    }

    /// Marks the ticket as abandoned unless it is already settled.
    fn abandon(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.is_pending() {
                *state = FlightState::Abandoned;
                true
            } else {
                false
            }
        })
    }

    /// Returns true once the ticket has been settled either way.
    pub fn is_settled(&self) -> bool {
        !self.state.borrow().is_pending()
    }

    /// Waits for the owner to settle the ticket.
    ///
    /// Returns the published outcome, or `None` if the owner was dropped
    /// without publishing. There is no timeout at this layer.
    pub async fn wait(&self) -> Option<T> {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| !state.is_pending()).await {
            Ok(state) => state.settled(),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => None,
        }
    }
}

/// Result of claiming a key.
#[derive(Debug)]
pub enum Claim<'a, K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    /// The caller must do the work and publish through the guard.
    Owner(OwnerGuard<'a, K, T>),
    /// Another caller is already doing the work.
    Waiter(Arc<Ticket<T>>),
}

/// Ownership of an in-flight key.
///
/// Dropping the guard releases the key. If [`complete`](Self::complete) was
/// never called the ticket is first settled as abandoned, so waiters are
/// never left hanging.
#[derive(Debug)]
pub struct OwnerGuard<'a, K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    flights: &'a SingleFlight<K, T>,
    key: K,
    ticket: Arc<Ticket<T>>,
}

impl<K, T> OwnerGuard<'_, K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    /// The key this guard owns.
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// The ticket waiters are observing.
    pub const fn ticket(&self) -> &Arc<Ticket<T>> {
        &self.ticket
    }

    /// Publishes the outcome to every waiter and releases the key.
    pub fn complete(self, outcome: T) {
        self.ticket.resolve(outcome);
    }
}

impl<K, T> Drop for OwnerGuard<'_, K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    fn drop(&mut self) {
        self.ticket.abandon();
        self.flights.release(&self.key, &self.ticket);
    }
}

/// Table of in-flight tickets keyed by work identity.
#[derive(Debug)]
pub struct SingleFlight<K, T> {
    tickets: Mutex<HashMap<K, Arc<Ticket<T>>>>,
}

impl<K, T> Default for SingleFlight<K, T> {
    fn default() -> Self {
        Self {
            tickets: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the ticket for `key` and whether the caller is its owner.
    ///
    /// Check-and-create happens under one lock, so exactly one concurrent
    /// caller per key observes `true`. An owner obtained this way must call
    /// [`release`](Self::release) itself; prefer [`claim`](Self::claim).
    pub fn acquire(&self, key: &K) -> (Arc<Ticket<T>>, bool) {
        let mut tickets = self.tickets.lock();
        if let Some(existing) = tickets.get(key) {
            return (Arc::clone(existing), false);
        }

        let ticket = Arc::new(Ticket::new());
        tickets.insert(key.clone(), Arc::clone(&ticket));
        (ticket, true)
    }

    /// Removes `ticket` from the table if it is still the current ticket for
    /// `key`. Returns true if it was removed.
    pub fn release(&self, key: &K, ticket: &Arc<Ticket<T>>) -> bool {
        let mut tickets = self.tickets.lock();
        match tickets.get(key) {
            Some(current) if Arc::ptr_eq(current, ticket) => {
                tickets.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Claims `key`, returning an [`OwnerGuard`] to the first caller and the
    /// shared ticket to everyone else.
    pub fn claim(&self, key: K) -> Claim<'_, K, T> {
        let (ticket, is_owner) = self.acquire(&key);
        if is_owner {
            Claim::Owner(OwnerGuard {
                flights: self,
                key,
                ticket,
            })
        } else {
            Claim::Waiter(ticket)
        }
    }

    /// Returns true if work for `key` is in flight.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.tickets.lock().contains_key(key)
    }

    /// Returns the number of keys currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.tickets.lock().len()
    }
}
