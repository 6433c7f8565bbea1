use std::{
  collections::BTreeMap,
  pin::Pin,
  task::{Context, Poll},
  time::{Duration, Instant},
};

use futures_util::{Future, Stream};
use tokio::time::{sleep_until, Sleep};

/// Key of a scheduled entry; hand it back to [`Timer::cancel`] to revoke
/// the timeout before it fires.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct Timeout {
  deadline: Instant,
  seq: u64,
}

/// Deadline-ordered timeout queue, consumed as a `Stream`.
///
/// Every entry lives in one ordered map, keyed by deadline plus a sequence
/// number so equal deadlines fire in scheduling order. A single alarm is
/// kept aimed at whichever deadline is currently earliest; scheduling and
/// cancellation only touch the map, and the alarm is re-aimed on the next
/// poll.
pub(crate) struct Timer<T> {
  entries: BTreeMap<Timeout, T>,
  alarm: Option<Pin<Box<Sleep>>>,
  next_seq: u64,
}

impl<T> Timer<T> {
  pub fn new() -> Self {
    Self {
      entries: BTreeMap::new(),
      alarm: None,
      next_seq: 0,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn schedule_in(&mut self, delay: Duration, value: T) -> Timeout {
    self.schedule_at(Instant::now() + delay, value)
  }

  pub fn schedule_at(&mut self, deadline: Instant, value: T) -> Timeout {
    let key = Timeout {
      deadline,
      seq: self.next_seq,
    };
    self.next_seq = self.next_seq.wrapping_add(1);

    self.entries.insert(key, value);
    key
  }

  /// Revoke a scheduled timeout. Returns false if it already fired or was
  /// never scheduled.
  pub fn cancel(&mut self, timeout: Timeout) -> bool {
    self.entries.remove(&timeout).is_some()
  }
}

impl<T: Unpin> Stream for Timer<T> {
  type Item = T;

  fn poll_next(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Self::Item>> {
    let this = &mut *self;

    // Aim the alarm at the current head before every poll, so entries
    // scheduled or cancelled since the last poll are taken into account.
    let Some(head) = this.entries.keys().next().copied() else {
      this.alarm = None;
      return Poll::Ready(None);
    };

    let deadline = head.deadline.into();

    let alarm = this
      .alarm
      .get_or_insert_with(|| Box::pin(sleep_until(deadline)));

    if alarm.deadline() != deadline {
      alarm.as_mut().reset(deadline);
    }

    match alarm.as_mut().poll(cx) {
      Poll::Ready(()) => Poll::Ready(this.entries.remove(&head)),
      Poll::Pending => Poll::Pending,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use futures_util::StreamExt;

  use super::Timer;

  #[tokio::test(start_paused = true)]
  async fn positive_fires_in_deadline_order() {
    let mut timer = Timer::new();

    timer.schedule_in(Duration::from_millis(200), "late");
    timer.schedule_in(Duration::from_millis(100), "early");

    assert_eq!(timer.next().await, Some("early"));
    assert_eq!(timer.next().await, Some("late"));
    assert!(timer.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn positive_cancel_prevents_firing() {
    let mut timer = Timer::new();

    let keep = timer.schedule_in(Duration::from_millis(100), "keep");
    let drop = timer.schedule_in(Duration::from_millis(50), "drop");

    assert!(timer.cancel(drop));
    assert!(!timer.cancel(drop));
    let _ = keep;

    assert_eq!(timer.next().await, Some("keep"));
  }

  #[tokio::test(start_paused = true)]
  async fn positive_earlier_entry_preempts_armed_one() {
    let mut timer = Timer::new();

    timer.schedule_in(Duration::from_millis(200), "late");

    // Arm the alarm for "late", then schedule something earlier.
    futures_util::future::poll_fn(|cx| {
      let _ = timer.poll_next_unpin(cx);
      std::task::Poll::Ready(())
    })
    .await;

    timer.schedule_in(Duration::from_millis(50), "early");

    assert_eq!(timer.next().await, Some("early"));
    assert_eq!(timer.next().await, Some("late"));
  }
}
