use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::error::ChainError;

#[derive(Debug, Default)]
struct LaneState {
  next_ticket: u64,
  serving: u64,
  /// Tickets abandoned before their turn came up.
  abandoned: BTreeSet<u64>,
}

#[derive(Debug)]
struct Lane {
  state: Mutex<LaneState>,
  serving: watch::Sender<u64>,
}

impl Lane {
  fn new() -> Self {
    let (serving, _) = watch::channel(0);
    Self {
      state: Mutex::new(LaneState::default()),
      serving,
    }
  }

  /// Retire `number`. Returns whether the lane has no tickets left.
  fn finish(&self, number: u64) -> bool {
    let Ok(mut state) = self.state.lock() else {
      return false;
    };
    if state.serving == number {
      state.serving += 1;
      loop {
        let serving = state.serving;
        if !state.abandoned.remove(&serving) {
          break;
        }
        state.serving += 1;
      }
      self.serving.send_replace(state.serving);
    } else if number > state.serving {
      state.abandoned.insert(number);
    }
    state.serving == state.next_ticket
  }
}

/// Lanes are per (chain id, lowercased sender).
type LaneKey = (u64, String);
type Lanes = Arc<Mutex<HashMap<LaneKey, Arc<Lane>>>>;

/// Arrival-order admission for one logical sender on one chain.
///
/// Stricter than the sequencer's per-key lock: a ticket taken at arrival
/// fixes the order in which requests may allocate nonces, even when the
/// requests reach the sequencer out of order. A lane is dropped once its
/// last ticket is retired.
#[derive(Debug, Default)]
pub struct OrderedAdmission {
  lanes: Lanes,
}

impl OrderedAdmission {
  pub fn new() -> Self {
    Self::default()
  }

  /// Take the next ticket for `sender` on `chain_id`.
  pub fn ticket(&self, chain_id: u64, sender: &str) -> Result<AdmissionTicket, ChainError> {
    let key = (chain_id, sender.to_lowercase());
    // The map stays locked while numbering so an idle lane cannot be
    // dropped between lookup and increment.
    let mut lanes = self.lanes.lock().map_err(|_| ChainError::Poisoned("admission lanes"))?;
    let lane = lanes
      .entry(key.clone())
      .or_insert_with(|| Arc::new(Lane::new()))
      .clone();

    let number = {
      let mut state = lane.state.lock().map_err(|_| ChainError::Poisoned("admission lane"))?;
      let number = state.next_ticket;
      state.next_ticket += 1;
      number
    };
    drop(lanes);

    Ok(AdmissionTicket {
      lanes: self.lanes.clone(),
      key,
      lane,
      number,
      finished: false,
    })
  }

  /// Lanes with tickets outstanding.
  pub fn active_lanes(&self) -> usize {
    self.lanes.lock().map(|lanes| lanes.len()).unwrap_or(0)
  }
}

/// A place in a sender's admission order.
///
/// Dropping a ticket without calling [`AdmissionTicket::admitted`] gives up
/// its place so later tickets are not blocked.
#[derive(Debug)]
pub struct AdmissionTicket {
  lanes: Lanes,
  key: LaneKey,
  lane: Arc<Lane>,
  number: u64,
  finished: bool,
}

impl AdmissionTicket {
  pub fn number(&self) -> u64 {
    self.number
  }

  /// Wait until every earlier ticket has obtained its nonce or been dropped.
  pub async fn wait_turn(&self) {
    let mut serving = self.lane.serving.subscribe();
    // The sender lives in the lane, which this ticket keeps alive.
    let _ = serving.wait_for(|serving| *serving >= self.number).await;
  }

  /// Mark this ticket's nonce as obtained, letting the next ticket proceed.
  pub fn admitted(mut self) {
    self.retire();
  }

  fn retire(&mut self) {
    self.finished = true;
    let mut lanes = self.lanes.lock().ok();
    if !self.lane.finish(self.number) {
      return;
    }
    if let Some(lanes) = lanes.as_mut() {
      if lanes.get(&self.key).is_some_and(|lane| Arc::ptr_eq(lane, &self.lane)) {
        lanes.remove(&self.key);
      }
    }
  }
}

impl Drop for AdmissionTicket {
  fn drop(&mut self) {
    if !self.finished {
      self.retire();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[tokio::test]
  async fn test_tickets_are_served_in_arrival_order() {
    let admission = OrderedAdmission::new();
    let first = admission.ticket(1409, "0xB").unwrap();
    let second = admission.ticket(1409, "0xb").unwrap();
    assert_eq!((first.number(), second.number()), (0, 1));

    let waiting = tokio::time::timeout(Duration::from_millis(20), second.wait_turn()).await;
    assert!(waiting.is_err());

    first.wait_turn().await;
    first.admitted();
    second.wait_turn().await;
  }

  #[tokio::test]
  async fn test_abandoned_ticket_does_not_block() {
    let admission = OrderedAdmission::new();
    let first = admission.ticket(1409, "0xB").unwrap();
    let second = admission.ticket(1409, "0xB").unwrap();
    let third = admission.ticket(1409, "0xB").unwrap();

    // Second gives up before its turn, first then finishes
    drop(second);
    first.admitted();

    tokio::time::timeout(Duration::from_millis(100), third.wait_turn())
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn test_lanes_are_per_chain_and_dropped_when_idle() {
    let admission = OrderedAdmission::new();
    let aux = admission.ticket(1409, "0xB").unwrap();
    let main = admission.ticket(1, "0xB").unwrap();

    // Same sender on another chain does not wait behind the first ticket
    assert_eq!((aux.number(), main.number()), (0, 0));
    tokio::time::timeout(Duration::from_millis(100), main.wait_turn())
      .await
      .unwrap();
    assert_eq!(admission.active_lanes(), 2);

    main.admitted();
    assert_eq!(admission.active_lanes(), 1);

    let next = admission.ticket(1409, "0xb").unwrap();
    drop(aux);
    assert_eq!(admission.active_lanes(), 1);
    next.admitted();
    assert_eq!(admission.active_lanes(), 0);

    // A fresh lane starts numbering again
    assert_eq!(admission.ticket(1409, "0xB").unwrap().number(), 0);
  }
}
