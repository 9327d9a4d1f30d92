//! Seeded record and predicate generators.

use arbor_common::types::{Identifier, Value};
use arbor_index::{CompareOp, Predicate, Record};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Properties every generated record may carry.
pub const PROPERTIES: [&str; 3] = ["age", "city", "score"];

const CITIES: [&str; 5] = ["oslo", "lima", "kyiv", "pune", "doha"];

const OPS: [CompareOp; 6] = [
    CompareOp::Eq,
    CompareOp::NotEq,
    CompareOp::Lt,
    CompareOp::LtEq,
    CompareOp::Gt,
    CompareOp::GtEq,
];

/// Generates records and predicates from a fixed seed.
#[derive(Debug)]
pub struct RecordWorkload {
    rng: StdRng,
    next_id: u64,
}

impl RecordWorkload {
    /// Creates a generator.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            next_id: 0,
        }
    }

    fn value_for(&mut self, property: &str) -> Value {
        match property {
            "age" => Value::from(self.rng.gen_range(0..12i64)),
            "city" => Value::text(*CITIES.choose(&mut self.rng).unwrap_or(&CITIES[0])),
            _ => Value::from(self.rng.gen_range(0..6i64) as f64 / 2.0),
        }
    }

    /// Generates a record with a fresh identifier. Each property carries
    /// zero to two values; now and then a value of an unexpected kind.
    pub fn record(&mut self) -> Record {
        self.next_id += 1;
        let mut record = Record::new(Identifier::parse(&format!("objects/o{:05}", self.next_id)));
        for property in PROPERTIES {
            for _ in 0..self.rng.gen_range(0..3) {
                let value = if self.rng.gen_bool(0.05) {
                    Value::from(self.rng.gen_bool(0.5))
                } else {
                    self.value_for(property)
                };
                record = record.with(property, value);
            }
        }
        record
    }

    /// Generates `count` records.
    pub fn records(&mut self, count: usize) -> Vec<Record> {
        (0..count).map(|_| self.record()).collect()
    }

    /// Generates a predicate nested up to `depth` levels, using only
    /// operators an index can evaluate.
    pub fn predicate(&mut self, depth: usize) -> Predicate {
        if depth == 0 || self.rng.gen_bool(0.4) {
            return self.comparison();
        }
        let parts = (0..self.rng.gen_range(1..4))
            .map(|_| self.predicate(depth - 1))
            .collect();
        if self.rng.gen_bool(0.5) {
            Predicate::and(parts)
        } else {
            Predicate::or(parts)
        }
    }

    fn comparison(&mut self) -> Predicate {
        let property = *PROPERTIES.choose(&mut self.rng).unwrap_or(&PROPERTIES[0]);
        let op = *OPS.choose(&mut self.rng).unwrap_or(&CompareOp::Eq);
        let values: Vec<Value> = (0..self.rng.gen_range(1..3))
            .map(|_| self.value_for(property))
            .collect();
        if self.rng.gen_bool(0.5) {
            Predicate::all_of(property, op, values)
        } else {
            Predicate::some_of(property, op, values)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_is_deterministic() {
        let a = RecordWorkload::new(9).records(20);
        let b = RecordWorkload::new(9).records(20);
        assert_eq!(a, b);
        assert_eq!(a[0].id, Identifier::parse("objects/o00001"));
    }

    #[test]
    fn test_predicates_avoid_like() {
        fn uses_like(p: &Predicate) -> bool {
            match p {
                Predicate::Compare { op, .. } => *op == CompareOp::Like,
                Predicate::And(parts) | Predicate::Or(parts) => parts.iter().any(uses_like),
            }
        }
        let mut workload = RecordWorkload::new(3);
        for _ in 0..100 {
            assert!(!uses_like(&workload.predicate(3)));
        }
    }
}
