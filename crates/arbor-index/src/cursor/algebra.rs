//! Intersection and union of identifier cursors.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use arbor_common::error::ArborResult;
use arbor_common::types::Identifier;

use super::IdCursor;

/// Intersection of its operands.
///
/// Zig-zag join: the first operand proposes a candidate, every other operand
/// seeks to it; if one lands past the candidate, that key becomes the next
/// candidate.
pub struct ConjunctiveCursor {
    operands: Vec<Box<dyn IdCursor>>,
    current: Option<Identifier>,
}

impl ConjunctiveCursor {
    /// Builds the intersection and positions it on its first identifier.
    /// With no operands the intersection is empty.
    pub fn new(operands: Vec<Box<dyn IdCursor>>) -> ArborResult<Self> {
        let mut cursor = Self {
            operands,
            current: None,
        };
        cursor.align()?;
        Ok(cursor)
    }

    fn align(&mut self) -> ArborResult<bool> {
        self.current = None;
        let Some((lead, rest)) = self.operands.split_first_mut() else {
            return Ok(false);
        };
        'candidates: loop {
            let Some(mut candidate) = lead.key().cloned() else {
                return Ok(false);
            };
            for operand in rest.iter_mut() {
                if !operand.seek(&candidate)? {
                    return Ok(false);
                }
                match operand.key() {
                    Some(landed) if *landed == candidate => {}
                    Some(landed) => {
                        candidate = landed.clone();
                        if !lead.seek(&candidate)? {
                            return Ok(false);
                        }
                        continue 'candidates;
                    }
                    None => return Ok(false),
                }
            }
            self.current = Some(candidate);
            return Ok(true);
        }
    }
}

impl IdCursor for ConjunctiveCursor {
    fn key(&self) -> Option<&Identifier> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> ArborResult<bool> {
        if self.current.is_none() {
            return Ok(false);
        }
        if !self.operands[0].advance()? {
            self.current = None;
            return Ok(false);
        }
        self.align()
    }

    fn seek(&mut self, target: &Identifier) -> ArborResult<bool> {
        match &self.current {
            None => return Ok(false),
            Some(current) if current >= target => return Ok(true),
            Some(_) => {}
        }
        if !self.operands[0].seek(target)? {
            self.current = None;
            return Ok(false);
        }
        self.align()
    }
}

/// Union of its operands.
///
/// Keeps the current key of every live operand in a min-heap; the smallest
/// is the cursor's key. Advancing moves every operand sitting on it.
pub struct DisjunctiveCursor {
    operands: Vec<Box<dyn IdCursor>>,
    frontier: BinaryHeap<Reverse<(Identifier, usize)>>,
}

impl DisjunctiveCursor {
    /// Builds the union. With no operands the union is empty.
    pub fn new(operands: Vec<Box<dyn IdCursor>>) -> Self {
        let frontier = operands
            .iter()
            .enumerate()
            .filter_map(|(slot, op)| op.key().map(|k| Reverse((k.clone(), slot))))
            .collect();
        Self { operands, frontier }
    }

    /// Pops frontier entries while `below` holds and moves their operands:
    /// seeks them to `target`, or advances them when there is none.
    fn step_while<F>(&mut self, mut below: F, target: Option<&Identifier>) -> ArborResult<bool>
    where
        F: FnMut(&Identifier) -> bool,
    {
        while let Some(Reverse((key, slot))) = self.frontier.peek() {
            if !below(key) {
                break;
            }
            let slot = *slot;
            self.frontier.pop();
            let operand = &mut self.operands[slot];
            let live = match target {
                Some(target) => operand.seek(target)?,
                None => operand.advance()?,
            };
            if live {
                if let Some(key) = operand.key() {
                    self.frontier.push(Reverse((key.clone(), slot)));
                }
            }
        }
        Ok(!self.frontier.is_empty())
    }
}

impl IdCursor for DisjunctiveCursor {
    fn key(&self) -> Option<&Identifier> {
        self.frontier.peek().map(|Reverse((key, _))| key)
    }

    fn advance(&mut self) -> ArborResult<bool> {
        let Some(minimum) = self.key().cloned() else {
            return Ok(false);
        };
        self.step_while(|key| *key == minimum, None)
    }

    fn seek(&mut self, target: &Identifier) -> ArborResult<bool> {
        self.step_while(|key| key < target, Some(target))
    }
}

impl std::fmt::Debug for ConjunctiveCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConjunctiveCursor")
            .field("operands", &self.operands.len())
            .field("current", &self.current)
            .finish()
    }
}

impl std::fmt::Debug for DisjunctiveCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisjunctiveCursor")
            .field("operands", &self.operands.len())
            .field("live", &self.frontier.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::cursor::tests::{ids, list};
    use crate::cursor::{IdentifierStream, ListCursor};

    fn drain(cursor: impl IdCursor + 'static) -> Vec<Identifier> {
        IdentifierStream::new(Box::new(cursor)).collect_all().unwrap()
    }

    #[test]
    fn test_conjunction() {
        let and = ConjunctiveCursor::new(vec![
            list(&["a", "c", "d", "f"]),
            list(&["b", "c", "f", "g"]),
            list(&["c", "e", "f"]),
        ])
        .unwrap();
        assert_eq!(drain(and), ids(&["c", "f"]));

        let disjoint = ConjunctiveCursor::new(vec![list(&["a"]), list(&["b"])]).unwrap();
        assert_eq!(disjoint.key(), None);
        assert!(drain(ConjunctiveCursor::new(Vec::new()).unwrap()).is_empty());
    }

    #[test]
    fn test_disjunction() {
        let or = DisjunctiveCursor::new(vec![
            list(&["b", "d"]),
            list(&["a", "d", "e"]),
            Box::new(ListCursor::empty()),
            list(&["d"]),
        ]);
        assert_eq!(drain(or), ids(&["a", "b", "d", "e"]));
        assert!(drain(DisjunctiveCursor::new(Vec::new())).is_empty());
    }

    #[test]
    fn test_seek_skips_ahead() {
        let mut or = DisjunctiveCursor::new(vec![list(&["a", "m", "z"]), list(&["b", "n"])]);
        assert!(or.seek(&Identifier::parse("c")).unwrap());
        assert_eq!(or.key(), Some(&Identifier::parse("m")));

        let mut and =
            ConjunctiveCursor::new(vec![list(&["a", "m", "q"]), list(&["a", "m", "q"])]).unwrap();
        assert!(and.seek(&Identifier::parse("n")).unwrap());
        assert_eq!(and.key(), Some(&Identifier::parse("q")));
        assert!(and.seek(&Identifier::parse("b")).unwrap());
        assert_eq!(and.key(), Some(&Identifier::parse("q")));
        assert!(!and.seek(&Identifier::parse("r")).unwrap());
    }

    #[test]
    fn test_nested_algebra_matches_set_operations() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..50 {
            let sets: Vec<BTreeSet<Identifier>> = (0..rng.gen_range(1..5))
                .map(|_| {
                    (0..rng.gen_range(0..40))
                        .map(|_| Identifier::parse(&format!("o{:03}", rng.gen_range(0..60))))
                        .collect()
                })
                .collect();
            let cursors = |sets: &[BTreeSet<Identifier>]| -> Vec<Box<dyn IdCursor>> {
                sets.iter()
                    .map(|s| Box::new(ListCursor::new(s.iter().cloned().collect())) as Box<dyn IdCursor>)
                    .collect()
            };

            let union: BTreeSet<Identifier> = sets.iter().flatten().cloned().collect();
            let intersection: BTreeSet<Identifier> = union
                .iter()
                .filter(|id| sets.iter().all(|s| s.contains(*id)))
                .cloned()
                .collect();

            let or = DisjunctiveCursor::new(cursors(&sets[..]));
            assert_eq!(drain(or), union.iter().cloned().collect::<Vec<_>>());
            let and = ConjunctiveCursor::new(cursors(&sets[..])).unwrap();
            assert_eq!(drain(and), intersection.iter().cloned().collect::<Vec<_>>());

            // (S0 ∪ S1) ∩ S0 == S0
            let nested = ConjunctiveCursor::new(vec![
                Box::new(DisjunctiveCursor::new(cursors(&sets[..]))),
                cursors(&sets[..1]).remove(0),
            ])
            .unwrap();
            assert_eq!(drain(nested), sets[0].iter().cloned().collect::<Vec<_>>());
        }
    }
}
