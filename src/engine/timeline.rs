//! Black/freeze timeline merge.
//!
//! A fully black frame is also frozen, so freezedetect reports every black segment a
//! second time. The merge walks a single sorted event timeline and trims freezes where
//! they coincide with blacks; freezes outside any black pass through unchanged.

use log::debug;

use crate::types::Interval;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Edge {
    Start,
    End,
}

#[derive(Clone, Copy, Debug)]
struct Event {
    time: f64,
    edge: Edge,
    is_black: bool,
}

fn build_timeline(blacks: &[Interval], freezes: &[Interval]) -> Vec<Event> {
    let mut events = Vec::with_capacity(2 * (blacks.len() + freezes.len()));
    for (list, is_black) in [(blacks, true), (freezes, false)] {
        for iv in list {
            events.push(Event {
                time: iv.start,
                edge: Edge::Start,
                is_black,
            });
            events.push(Event {
                time: iv.end,
                edge: Edge::End,
                is_black,
            });
        }
    }
    events.sort_by(|a, b| a.time.total_cmp(&b.time));
    let mut ordered = Vec::with_capacity(events.len());
    for group in events.chunk_by(|a, b| a.time == b.time) {
        order_ties(group, &mut ordered);
    }
    ordered
}

/// Same-time events: the leading black ends go before the freeze events and the remaining
/// black events after them. Blacks keep their relative order, and so do freezes.
fn order_ties(group: &[Event], out: &mut Vec<Event>) {
    let blacks: Vec<Event> = group.iter().filter(|e| e.is_black).copied().collect();
    let lead = blacks.iter().take_while(|e| e.edge == Edge::End).count();
    out.extend_from_slice(&blacks[..lead]);
    out.extend(group.iter().filter(|e| !e.is_black));
    out.extend_from_slice(&blacks[lead..]);
}

#[derive(Default)]
struct Sweep {
    open: Option<f64>,
    interrupted: bool,
    out: Vec<Interval>,
}

impl Sweep {
    fn open_at(&mut self, t: f64) {
        self.open = Some(t);
    }

    /// Close the open freeze at `t`. Zero-length freezes are dropped.
    fn close_at(&mut self, t: f64) {
        if let Some(start) = self.open.take()
            && t != start
        {
            self.out.push(Interval::new(start, t));
        }
    }

    fn step(&mut self, ev: Event) {
        match (ev.edge, ev.is_black) {
            (Edge::Start, false) => {
                if self.open.is_none() {
                    self.open_at(ev.time);
                }
            }
            (Edge::Start, true) => {
                if self.open.is_some() {
                    self.interrupted = true;
                    self.close_at(ev.time);
                }
            }
            (Edge::End, true) => {
                if self.interrupted {
                    self.interrupted = false;
                    self.open_at(ev.time);
                }
            }
            (Edge::End, false) => {
                if self.open.is_some() {
                    self.close_at(ev.time);
                } else if let Some(last) = self.out.last_mut() {
                    *last = Interval::new(last.start, ev.time);
                    self.interrupted = false;
                }
            }
        }
    }
}

/// Remove the parts of `freezes` explained by `blacks`. A freeze still open after the last
/// event is closed at `media_duration`.
pub fn merge_blacks_and_freezes(
    blacks: &[Interval],
    freezes: &[Interval],
    media_duration: f64,
) -> Vec<Interval> {
    let mut sweep = Sweep::default();
    for ev in build_timeline(blacks, freezes) {
        sweep.step(ev);
    }
    if let Some(start) = sweep.open {
        if media_duration > start {
            sweep.close_at(media_duration);
        } else {
            debug!(
                "Dropping freeze open at {} past media duration {}",
                start, media_duration
            );
        }
    }
    sweep.out
}

/// Freeze list to store: merged when `enabled` and both lists are non-empty, else unchanged.
pub fn reconcile_freezes(
    enabled: bool,
    blacks: &[Interval],
    freezes: Vec<Interval>,
    media_duration: f64,
) -> Vec<Interval> {
    if enabled && !blacks.is_empty() && !freezes.is_empty() {
        merge_blacks_and_freezes(blacks, &freezes, media_duration)
    } else {
        freezes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(s: f64, e: f64) -> Interval {
        Interval::new(s, e)
    }

    #[test]
    fn tie_order_puts_black_end_first_and_black_start_last() {
        let events = build_timeline(&[iv(2.0, 5.0)], &[iv(2.0, 5.0)]);
        let at2: Vec<_> = events
            .iter()
            .filter(|e| e.time == 2.0)
            .map(|e| (e.is_black, e.edge))
            .collect();
        assert_eq!(at2, vec![(false, Edge::Start), (true, Edge::Start)]);
        let at5: Vec<_> = events
            .iter()
            .filter(|e| e.time == 5.0)
            .map(|e| (e.is_black, e.edge))
            .collect();
        assert_eq!(at5, vec![(true, Edge::End), (false, Edge::End)]);
    }

    #[test]
    fn tie_order_keeps_blacks_in_their_own_order() {
        // [2,3] is listed first, so its start stays ahead of the [1,2] end.
        let events = build_timeline(&[iv(2.0, 3.0), iv(1.0, 2.0)], &[iv(0.0, 2.0)]);
        let at2: Vec<_> = events
            .iter()
            .filter(|e| e.time == 2.0)
            .map(|e| (e.is_black, e.edge))
            .collect();
        assert_eq!(
            at2,
            vec![(false, Edge::End), (true, Edge::Start), (true, Edge::End)]
        );

        let events = build_timeline(&[iv(1.0, 2.0), iv(2.0, 3.0)], &[iv(2.0, 4.0)]);
        let at2: Vec<_> = events
            .iter()
            .filter(|e| e.time == 2.0)
            .map(|e| (e.is_black, e.edge))
            .collect();
        assert_eq!(
            at2,
            vec![(true, Edge::End), (false, Edge::Start), (true, Edge::Start)]
        );
    }

    #[test]
    fn identical_black_and_freeze_is_absorbed() {
        assert!(merge_blacks_and_freezes(&[iv(2.0, 5.0)], &[iv(2.0, 5.0)], 10.0).is_empty());
    }

    #[test]
    fn freeze_ending_inside_black_extends_previous() {
        // freeze [1,4], black [2,6]: cut at 2, the trailing freeze end extends it back to 4
        let out = merge_blacks_and_freezes(&[iv(2.0, 6.0)], &[iv(1.0, 4.0)], 10.0);
        assert_eq!(out, vec![iv(1.0, 4.0)]);
    }

    #[test]
    fn disabled_passes_through() {
        let freezes = vec![iv(1.0, 6.0)];
        assert_eq!(
            reconcile_freezes(false, &[iv(2.0, 5.0)], freezes.clone(), 10.0),
            freezes
        );
        assert_eq!(reconcile_freezes(true, &[], freezes.clone(), 10.0), freezes);
    }
}
