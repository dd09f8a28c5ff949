//! Property-based tests for the shared record formats.
//!
//! Uses proptest to verify:
//! 1. Any task survives JSON and postcard round trips unchanged.
//! 2. Any history entry survives a JSON round trip.
//! 3. Any `StoreMessage` survives encode → decode.
//! 4. Random bytes never cause a panic in `decode` (returns `Err` gracefully).
//! 5. Document paths parse back to themselves from their display form.

use eisen_proto::codec;
use eisen_proto::doc::{DocPath, Document, WriteBatch};
use eisen_proto::history::{ChangeValue, FieldChange, HistoryAction, HistoryEntry};
use eisen_proto::store::StoreMessage;
use eisen_proto::task::{Schedule, Task, TaskId, TaskStatus};
use proptest::prelude::*;

// --- Strategies for record types ---

fn arb_segment() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,16}"
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        arb_segment(),
        ".{0,40}",
        ".{0,80}",
        1u8..=5,
        prop::collection::vec("[a-z]{1,10}", 0..4),
        any::<bool>(),
        any::<bool>(),
        prop::option::of(any::<u64>()),
        any::<u64>(),
        any::<u64>(),
    )
        .prop_map(
            |(id, title, description, priority, tags, done, tomorrow, due_date, created_at, updated_at)| Task {
                id: TaskId::from(id),
                title,
                description,
                priority,
                tags,
                status: if done { TaskStatus::Completed } else { TaskStatus::Todo },
                scheduled_for: if tomorrow { Schedule::Tomorrow } else { Schedule::Today },
                due_date,
                created_at,
                updated_at,
                completed_at: done.then_some(updated_at),
            },
        )
}

fn arb_change_value() -> impl Strategy<Value = ChangeValue> {
    prop_oneof![
        Just(ChangeValue::Null),
        ".{0,20}".prop_map(ChangeValue::Text),
        any::<u64>().prop_map(ChangeValue::Number),
        prop::collection::vec("[a-z]{1,8}", 0..3).prop_map(ChangeValue::Tags),
    ]
}

fn arb_entry() -> impl Strategy<Value = HistoryEntry> {
    (
        arb_segment(),
        any::<u64>(),
        prop_oneof![
            Just(HistoryAction::Create),
            Just(HistoryAction::Update),
            Just(HistoryAction::Delete),
        ],
        arb_segment(),
        arb_task(),
        prop::option::of(prop::collection::vec(
            ("[a-zA-Z]{1,12}", arb_change_value(), arb_change_value())
                .prop_map(|(field, old, new)| FieldChange::new(field, old, new)),
            0..4,
        )),
    )
        .prop_map(|(id, timestamp, action, actor_id, ticket_data, changes)| HistoryEntry {
            id,
            timestamp,
            action,
            actor_id,
            ticket_data,
            changes,
        })
}

fn arb_path() -> impl Strategy<Value = DocPath> {
    (arb_segment(), any::<bool>(), prop::option::of(arb_segment())).prop_map(|(actor, tasks, doc)| {
        match (tasks, doc) {
            (true, None) => DocPath::tasks(actor),
            (true, Some(id)) => DocPath::task(actor, &TaskId::from(id)),
            (false, None) => DocPath::history(actor),
            (false, Some(id)) => DocPath::history_entry(actor, id),
        }
    })
}

fn arb_message() -> impl Strategy<Value = StoreMessage> {
    prop_oneof![
        arb_segment().prop_map(|actor_id| StoreMessage::Hello { actor_id }),
        (any::<u64>(), arb_path()).prop_map(|(request_id, path)| StoreMessage::Get { request_id, path }),
        (any::<u64>(), arb_segment(), arb_task()).prop_map(|(request_id, actor, task)| {
            StoreMessage::Set {
                request_id,
                path: DocPath::task(actor, &task.id),
                document: Document::Task(task),
            }
        }),
        (any::<u64>(), arb_segment(), arb_entry(), arb_task()).prop_map(|(request_id, actor, entry, task)| {
            StoreMessage::Commit {
                request_id,
                batch: WriteBatch::new()
                    .set(DocPath::task(actor.clone(), &task.id), Document::Task(task))
                    .set(DocPath::history_entry(actor, entry.id.clone()), Document::History(entry)),
            }
        }),
        (any::<u64>(), prop::collection::vec(arb_task(), 0..4))
            .prop_map(|(subscription_id, tasks)| StoreMessage::Snapshot { subscription_id, tasks }),
        (prop::option::of(any::<u64>()), ".{0,40}")
            .prop_map(|(request_id, reason)| StoreMessage::Error { request_id, reason }),
    ]
}

// --- Properties ---

proptest! {
    #[test]
    fn task_json_round_trip(task in arb_task()) {
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, task);
    }

    #[test]
    fn task_postcard_round_trip(task in arb_task()) {
        let bytes = codec::encode(&task).unwrap();
        let back: Task = codec::decode(&bytes).unwrap();
        prop_assert_eq!(back, task);
    }

    #[test]
    fn history_entry_json_round_trip(entry in arb_entry()) {
        let json = serde_json::to_string(&entry).unwrap();
        let back: HistoryEntry = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, entry);
    }

    #[test]
    fn store_message_round_trip(msg in arb_message()) {
        let bytes = codec::encode(&msg).unwrap();
        let back: StoreMessage = codec::decode(&bytes).unwrap();
        prop_assert_eq!(back, msg);
    }

    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode::<StoreMessage>(&bytes);
        let _ = codec::decode::<Task>(&bytes);
    }

    #[test]
    fn doc_path_display_parses_back(path in arb_path()) {
        let parsed = DocPath::parse(&path.to_string()).unwrap();
        prop_assert_eq!(parsed, path);
    }

    #[test]
    fn paths_outside_actor_namespace_are_rejected(first in "[a-z]{1,8}", rest in "[a-z]{1,8}") {
        prop_assume!(first != "actors");
        let candidate = format!("{first}/{rest}/tasks");
        prop_assert!(DocPath::parse(&candidate).is_err());
    }
}
