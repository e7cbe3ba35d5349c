use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::message::Message;

/// The `Mailbox` holds all messages sent to an actor that were not yet handled.
///
/// Producers push synchronously and never block, the queue is unbounded. The actor's engine is
/// the only consumer and awaits on [`Mailbox::pop`]. The order of messages is preserved.
///
/// After [`Mailbox::close`] is called further pushes are rejected and `pop()` returns `None` once
/// the backlog is exhausted.
///
/// ## Safety
///
/// This should be cancellation safe and can be used inside `tokio::select!` statements:
/// https://docs.rs/tokio/1.10.0/tokio/macro.select.html#cancellation-safety
#[derive(Clone, Default)]
pub struct Mailbox {
    inner: Arc<Mutex<InnerMailbox>>,
}

#[derive(Default)]
struct InnerMailbox {
    waker: Option<Waker>,
    found: Option<Message>,
    messages: VecDeque<Message>,
    closed: bool,
}

impl Mailbox {
    fn lock(&self) -> MutexGuard<'_, InnerMailbox> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return message in FIFO order from mailbox.
    ///
    /// If no message exist, waits until one is pushed. Returns `None` if the mailbox is closed and
    /// empty.
    pub async fn pop(&self) -> Option<Message> {
        // Mailbox lock must be released before .await
        {
            let mut mailbox = self.lock();

            // If a found message exists here, it means that the previous `.await` was canceled
            // after a `wake()` call. To not lose this message it should be put back in front.
            if let Some(found) = mailbox.found.take() {
                mailbox.messages.push_front(found);
            }
            if let Some(message) = mailbox.messages.pop_front() {
                return Some(message);
            }
            if mailbox.closed {
                return None;
            }
        }
        self.await
    }

    /// Pushes a message into the mailbox.
    ///
    /// If the message is being .awaited on, this call will immediately notify the waker that it's
    /// ready, otherwise it will push it at the end of the queue. A closed mailbox hands the message
    /// back.
    pub fn push(&self, message: Message) -> Result<(), Message> {
        let mut mailbox = self.lock();
        if mailbox.closed {
            return Err(message);
        }
        // If waiting on a new message notify executor that it arrived.
        if let Some(waker) = mailbox.waker.take() {
            if mailbox.messages.is_empty() && mailbox.found.is_none() {
                mailbox.found = Some(message);
                waker.wake();
                return Ok(());
            }
            mailbox.waker = Some(waker);
        }
        mailbox.messages.push_back(message);
        Ok(())
    }

    /// Rejects all future pushes and wakes up a pending `pop()`.
    ///
    /// Returns the number of messages that were still waiting to be handled.
    pub fn close(&self) -> usize {
        let mut mailbox = self.lock();
        mailbox.closed = true;
        if let Some(waker) = mailbox.waker.take() {
            waker.wake();
        }
        mailbox.messages.len() + usize::from(mailbox.found.is_some())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Returns the number of messages currently waiting
    pub fn len(&self) -> usize {
        let mailbox = self.lock();
        mailbox.messages.len() + usize::from(mailbox.found.is_some())
    }

    /// Returns true if the mailbox has no waiting messages
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Future for &Mailbox {
    type Output = Option<Message>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut mailbox = self.lock();
        if let Some(message) = mailbox.found.take() {
            Poll::Ready(Some(message))
        } else if let Some(message) = mailbox.messages.pop_front() {
            Poll::Ready(Some(message))
        } else if mailbox.closed {
            Poll::Ready(None)
        } else {
            mailbox.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        future::Future,
        sync::{Arc, Mutex},
        task::{Context, Poll, Wake},
    };

    use super::{Mailbox, Message};

    fn text(message: Option<Message>) -> String {
        match message {
            Some(Message::Generic(value)) => value.as_str().unwrap_or_default().to_string(),
            other => panic!("Unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn preserves_push_order() {
        let mailbox = Mailbox::default();
        for word in ["Hello", "Foo", "Bar"] {
            mailbox.push(Message::generic(word)).unwrap();
        }
        assert_eq!(mailbox.len(), 3);
        assert_eq!(text(mailbox.pop().await), "Hello");
        assert_eq!(text(mailbox.pop().await), "Foo");
        assert_eq!(text(mailbox.pop().await), "Bar");
        assert!(mailbox.is_empty());
    }

    #[tokio::test]
    async fn closed_mailbox_drains_then_ends() {
        let mailbox = Mailbox::default();
        mailbox.push(Message::Empty).unwrap();
        mailbox.push(Message::Kill).unwrap();
        assert_eq!(mailbox.close(), 2);
        assert!(mailbox.push(Message::PoisonPill).is_err());
        assert!(matches!(mailbox.pop().await, Some(Message::Empty)));
        assert!(matches!(mailbox.pop().await, Some(Message::Kill)));
        assert!(mailbox.pop().await.is_none());
    }

    #[derive(Clone)]
    struct FlagWaker(Arc<Mutex<bool>>);
    impl Wake for FlagWaker {
        fn wake(self: Arc<Self>) {
            let mut called = self.0.lock().unwrap();
            *called = true;
        }
    }

    #[test]
    fn waiting_pop_activates_waker() {
        let mailbox = Mailbox::default();
        let waker = FlagWaker(Arc::new(Mutex::new(false)));
        let waker_ref = waker.clone();
        let waker = &Arc::new(waker).into();
        let mut context = Context::from_waker(waker);
        let fut = mailbox.pop();
        let mut fut = Box::pin(fut);
        // First poll will block
        let result = fut.as_mut().poll(&mut context);
        assert!(result.is_pending());
        assert!(!*waker_ref.0.lock().unwrap());
        // Pushing a message to the mailbox will call the waker
        mailbox.push(Message::Empty).unwrap();
        assert!(*waker_ref.0.lock().unwrap());
        let result = fut.as_mut().poll(&mut context);
        assert!(matches!(result, Poll::Ready(Some(Message::Empty))));
    }

    #[test]
    fn close_wakes_pending_pop() {
        let mailbox = Mailbox::default();
        let waker = FlagWaker(Arc::new(Mutex::new(false)));
        let waker_ref = waker.clone();
        let waker = &Arc::new(waker).into();
        let mut context = Context::from_waker(waker);
        let mut fut = Box::pin(mailbox.pop());
        assert!(fut.as_mut().poll(&mut context).is_pending());
        mailbox.close();
        assert!(*waker_ref.0.lock().unwrap());
        assert!(matches!(fut.as_mut().poll(&mut context), Poll::Ready(None)));
    }

    #[test]
    fn cancellation_safety() {
        let mailbox = Mailbox::default();
        let waker = FlagWaker(Arc::new(Mutex::new(false)));
        let waker_ref = waker.clone();
        let waker = &Arc::new(waker).into();
        let mut context = Context::from_waker(waker);
        let fut = mailbox.pop();
        let mut fut = Box::pin(fut);
        // First poll will block the future
        let result = fut.as_mut().poll(&mut context);
        assert!(result.is_pending());
        // Pushing a message should call the waker()
        mailbox.push(Message::generic("first")).unwrap();
        assert!(*waker_ref.0.lock().unwrap());
        // Dropping the future will cancel it
        drop(fut);
        mailbox.push(Message::generic("second")).unwrap();
        // The message handed to the canceled future is still the first one out
        let fut = mailbox.pop();
        tokio::pin!(fut);
        match fut.poll(&mut context) {
            Poll::Ready(message) => assert_eq!(text(message), "first"),
            Poll::Pending => panic!("Message was lost"),
        }
        assert_eq!(mailbox.len(), 1);
    }
}
