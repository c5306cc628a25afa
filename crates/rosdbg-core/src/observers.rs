//! # Observers
//!
//! Typed registration of the components that display or react to a session.
//!
//! A component implements [`SessionObserver`] and declares which handles it
//! wants by overriding the capability accessors:
//!
//! | accessor            | trait                    | receives                 |
//! |---------------------|--------------------------|--------------------------|
//! | `connection_user()` | [`UsesDebugConnection`]  | the [`Session`]          |
//! | `symbol_user()`     | [`UsesSymbols`]          | the [`SymbolContext`]    |
//! | `shell_user()`      | [`UsesShell`]            | the [`Shell`]            |
//!
//! The registry only keeps `Weak` references; a component that is dropped is
//! pruned the next time notifications are dispatched.
//!
//! Everything here is single-threaded by design of the callers: the registry
//! lives on the thread that drains notifications (the UI loop) and observers
//! are `Rc`s owned by that thread.

use std::rc::{Rc, Weak};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RosdbgResult;
use crate::events::{Notification, NotificationReceiver, SessionEvent};
use crate::session::{Session, SessionSnapshot};
use crate::symbols::SymbolContext;
use crate::types::{Address, SourceLocation};

/// Host services available to observers.
pub trait Shell
{
    /// Resolve `address` and move the source focus there.
    fn focus_address(&self, address: Address) -> SourceLocation;
}

/// Wants the session handle (to issue commands).
pub trait UsesDebugConnection
{
    fn set_debug_connection(&self, session: Session);
}

/// Wants the symbol context (to resolve addresses itself).
pub trait UsesSymbols
{
    fn set_symbol_provider(&self, symbols: Arc<SymbolContext>);
}

/// Wants the shell (to move source focus).
pub trait UsesShell
{
    fn set_shell(&self, shell: Arc<dyn Shell>);
}

/// Something that reacts to session notifications.
pub trait SessionObserver
{
    /// Called once per notification, in sequence order.
    fn on_event(&self, event: &SessionEvent);

    /// Called once at registration with the state as of that moment.
    fn on_registered(&self, _snapshot: &SessionSnapshot) {}

    fn connection_user(&self) -> Option<&dyn UsesDebugConnection>
    {
        None
    }

    fn symbol_user(&self) -> Option<&dyn UsesSymbols>
    {
        None
    }

    fn shell_user(&self) -> Option<&dyn UsesShell>
    {
        None
    }
}

struct Registration
{
    observer: Weak<dyn SessionObserver>,
    /// Last sequence number already reflected in the registration snapshot
    joined_at: u64,
}

/// Dispatches session notifications to registered observers.
pub struct ObserverRegistry
{
    session: Session,
    shell: Arc<dyn Shell>,
    receiver: NotificationReceiver,
    observers: Vec<Registration>,
    last_seq: u64,
}

impl ObserverRegistry
{
    /// Registry draining `session`'s notifications.
    ///
    /// ## Errors
    ///
    /// [`crate::RosdbgError::NotificationsTaken`] if another consumer already
    /// took the session's receiver.
    pub fn new(session: &Session, shell: Arc<dyn Shell>) -> RosdbgResult<Self>
    {
        Ok(Self {
            session: session.clone(),
            shell,
            receiver: session.take_notification_receiver()?,
            observers: Vec::new(),
            last_seq: 0,
        })
    }

    #[must_use]
    pub fn session(&self) -> &Session
    {
        &self.session
    }

    /// Number of live observers.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.observers.iter().filter(|entry| entry.observer.strong_count() > 0).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }

    /// Sequence number of the last dispatched notification.
    #[must_use]
    pub fn last_sequence(&self) -> u64
    {
        self.last_seq
    }

    /// Register `observer`, push its declared handles and its initial snapshot.
    ///
    /// Notifications queued before this call that the snapshot already
    /// reflects are not delivered to it again.
    pub fn register<T: SessionObserver + 'static>(&mut self, observer: &Rc<T>)
    {
        if let Some(user) = observer.connection_user() {
            user.set_debug_connection(self.session.clone());
        }
        if let Some(user) = observer.symbol_user() {
            user.set_symbol_provider(self.session.symbols());
        }
        if let Some(user) = observer.shell_user() {
            user.set_shell(Arc::clone(&self.shell));
        }

        let snapshot = self.session.snapshot();
        observer.on_registered(&snapshot);

        let observer: Rc<dyn SessionObserver> = observer.clone();
        self.observers.push(Registration {
            observer: Rc::downgrade(&observer),
            joined_at: snapshot.sequence,
        });
        tracing::debug!("Observer registered at sequence {}", snapshot.sequence);
    }

    /// Deliver everything already queued. Returns how many notifications were dispatched.
    pub fn dispatch_pending(&mut self) -> usize
    {
        let mut count = 0;
        while let Ok(notification) = self.receiver.try_recv() {
            self.dispatch(&notification);
            count += 1;
        }
        count
    }

    /// Wait up to `timeout` for one notification and deliver it.
    ///
    /// Returns `false` on timeout or when the session is gone.
    pub fn dispatch_next(&mut self, timeout: Duration) -> bool
    {
        match self.receiver.recv_timeout(timeout) {
            Ok(notification) => {
                self.dispatch(&notification);
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    fn dispatch(&mut self, notification: &Notification)
    {
        self.last_seq = notification.seq;
        self.observers.retain(|entry| {
            let Some(observer) = entry.observer.upgrade() else {
                return false;
            };
            if notification.seq > entry.joined_at {
                observer.on_event(&notification.event);
            }
            true
        });
    }
}
