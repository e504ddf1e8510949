// src/transaction/notify.rs

//! Progress notification
//!
//! One callback receives every well-defined progress point of a running
//! transaction. It may return an opaque token; the engine stores the token
//! for the span and hands it back on the paired closing call, interpreting
//! nothing about it.

use crate::transaction::element::Element;
use std::any::Any;

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    TransStart,
    TransProgress,
    TransStop,
    InstStart,
    InstProgress,
    InstStop,
    EraseStart,
    EraseStop,
    ScriptStart,
    ScriptStop,
}

impl CallbackKind {
    /// Does this call open a span whose token is returned on the close?
    pub fn opens_span(&self) -> bool {
        matches!(
            self,
            CallbackKind::TransStart
                | CallbackKind::InstStart
                | CallbackKind::EraseStart
                | CallbackKind::ScriptStart
        )
    }
}

/// Opaque caller-owned state threaded through a notification span
pub type Token = Box<dyn Any>;

/// Progress callback capability
///
/// `token` is `None` on span-opening calls; on the paired closing call it
/// carries back whatever the opening call returned.
pub trait Notify {
    fn notify(
        &mut self,
        element: Option<&Element>,
        kind: CallbackKind,
        amount: u64,
        total: u64,
        token: Option<Token>,
    ) -> Option<Token>;
}

/// Blanket impl so plain closures can act as notifiers
impl<F> Notify for F
where
    F: FnMut(Option<&Element>, CallbackKind, u64, u64, Option<Token>) -> Option<Token>,
{
    fn notify(
        &mut self,
        element: Option<&Element>,
        kind: CallbackKind,
        amount: u64,
        total: u64,
        token: Option<Token>,
    ) -> Option<Token> {
        self(element, kind, amount, total, token)
    }
}
