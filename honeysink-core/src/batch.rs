use bytes::Bytes;
use serde_json::{Map, Value};

use crate::{Error, Result};
use crate::record::{Document, Record};

/// Deepest retry level a batch can reach. Records of an original batch (depth 0) may be
/// resubmitted once, individually, at depth 1, and never again.
pub(crate) const MAX_RETRY_DEPTH: u8 = 1;

/// An ordered group of records sent as one request. The order is what lets per-record statuses in
/// a response be correlated back to records by index.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Batch {
    records: Vec<Record>,
    depth: u8,
}

impl Batch {
    pub(crate) fn new(records: Vec<Record>) -> Self {
        Self { records, depth: 0 }
    }

    /// A one-record batch resubmitting `record` out of a batch at `parent_depth`.
    pub(crate) fn retry_of(parent_depth: u8, record: Record) -> Self {
        Self {
            records: vec![record],
            depth: parent_depth.saturating_add(1),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn depth(&self) -> u8 {
        self.depth
    }

    pub(crate) fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Only batches with more than one record, below the retry depth limit, can be split.
    pub(crate) fn can_split(&self) -> bool {
        self.records.len() > 1 && self.depth < MAX_RETRY_DEPTH
    }

    /// Request body: `{"<dataset>": [<Document>, ...]}`.
    ///
    /// Records without a wire form are taken out of the batch, so the body still lines up with
    /// the batch by index. They are returned with their position in the batch as it was. Fails
    /// only when no record is left.
    pub(crate) fn encode(&mut self, dataset: &str) -> Result<(Bytes, Vec<(usize, Error)>)> {
        let mut documents = Vec::with_capacity(self.records.len());
        let mut rejected = Vec::new();
        let mut index = 0;
        self.records.retain(|record| {
            let kept = match Document::try_from(record) {
                Ok(document) => {
                    documents.push(document);
                    true
                }
                Err(e) => {
                    rejected.push((index, e));
                    false
                }
            };
            index += 1;
            kept
        });

        if documents.is_empty() {
            return Err(match rejected.pop() {
                Some((_, e)) => e,
                None => Error::Encode("batch has no records".to_string()),
            });
        }

        let mut body = Map::with_capacity(1);
        body.insert(dataset.to_string(), serde_json::to_value(documents)?);
        Ok((Bytes::from(serde_json::to_vec(&Value::Object(body))?), rejected))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rec(value: Value) -> Record {
        Record::try_from(value).unwrap()
    }

    #[test]
    fn test_encode_body() {
        let mut batch = Batch::new(vec![
            rec(json!({"@timestamp": "t1", "x": 1})),
            rec(json!({"@timestamp": "t2", "@samplerate": "10", "y": 2})),
        ]);
        let (body, rejected) = batch.encode("my-dataset").unwrap();
        assert!(rejected.is_empty());
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({"my-dataset": [
                {"time": "t1", "data": {"x": 1}},
                {"time": "t2", "data": {"y": 2}, "samplerate": 10},
            ]})
        );
    }

    #[test]
    fn test_encode_drops_only_unencodable_records() {
        let mut batch = Batch::new(vec![
            rec(json!({"x": 1})),
            rec(json!({"@samplerate": {"nested": true}})),
            rec(json!({"x": 3})),
        ]);
        let (body, rejected) = batch.encode("ds").unwrap();

        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, 1);
        assert!(matches!(rejected[0].1, Error::Encode(_)));
        assert_eq!(batch.len(), 2);

        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({"ds": [{"time": null, "data": {"x": 1}}, {"time": null, "data": {"x": 3}}]})
        );
    }

    #[test]
    fn test_encode_fails_when_nothing_is_left() {
        let mut batch = Batch::new(vec![
            rec(json!({"@samplerate": true})),
            rec(json!({"@samplerate": [4]})),
        ]);
        assert!(matches!(batch.encode("ds"), Err(Error::Encode(_))));
        assert_eq!(batch.len(), 0);
    }

    #[test]
    fn test_retry_depth() {
        let parent = Batch::new(vec![rec(json!({"a": 1})), rec(json!({"b": 2}))]);
        assert!(parent.can_split());
        assert_eq!(parent.depth(), 0);

        let child = Batch::retry_of(parent.depth(), rec(json!({"b": 2})));
        assert_eq!(child.depth(), 1);
        assert_eq!(child.len(), 1);
        assert!(!child.can_split());

        // even a multi-record batch at the depth limit cannot be split again
        let deep = Batch {
            records: vec![rec(json!({"a": 1})), rec(json!({"b": 2}))],
            depth: MAX_RETRY_DEPTH,
        };
        assert!(!deep.can_split());
    }

    #[test]
    fn test_single_record_batch_cannot_split() {
        let batch = Batch::new(vec![rec(json!({"a": 1}))]);
        assert!(!batch.can_split());
        assert_eq!(batch.len(), 1);
    }
}
