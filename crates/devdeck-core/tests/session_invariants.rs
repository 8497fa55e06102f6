//! Cursor, pin and focus stay consistent under arbitrary key, resize and reload sequences.
//!
//! Every task uses a blank command, so starting one fails immediately and no child is spawned.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use devdeck_core::event::event_channel;
use devdeck_core::{Event, Pane, Session, Supervisor, TaskRecord};
use proptest::prelude::*;

const NAMES: [&str; 5] = ["api", "db", "web", "worker", "cache"];

#[derive(Debug, Clone)]
enum Step {
    Key(KeyCode),
    Resize(u16, u16),
    /// New task list: names in order, and whether each one's definition changed.
    Reload(Vec<(&'static str, bool)>),
}

impl Step {
    fn into_event(self) -> Event {
        match self {
            Step::Key(code) => Event::Key(KeyEvent::new(code, KeyModifiers::NONE)),
            Step::Resize(width, height) => Event::Resize { width, height },
            Step::Reload(tasks) => Event::ConfigChanged(tasks_from(&tasks)),
        }
    }
}

fn tasks_from(entries: &[(&'static str, bool)]) -> Vec<TaskRecord> {
    entries.iter()
        .map(|(name, changed)| TaskRecord::new(*name, if *changed { "  " } else { "" }))
        .collect()
}

fn arb_task_list() -> impl Strategy<Value = Vec<(&'static str, bool)>> {
    proptest::sample::subsequence(NAMES.to_vec(), 0..=NAMES.len())
        .prop_shuffle()
        .prop_flat_map(|names| {
            let len = names.len();
            (Just(names), proptest::collection::vec(any::<bool>(), len))
        })
        .prop_map(|(names, changed)| names.into_iter().zip(changed).collect())
}

fn arb_key() -> impl Strategy<Value = KeyCode> {
    prop_oneof![
        Just(KeyCode::Up),
        Just(KeyCode::Down),
        Just(KeyCode::Char('j')),
        Just(KeyCode::Char('k')),
        Just(KeyCode::PageUp),
        Just(KeyCode::PageDown),
        Just(KeyCode::Home),
        Just(KeyCode::End),
        Just(KeyCode::Tab),
        Just(KeyCode::Char('s')),
        Just(KeyCode::Char('r')),
        Just(KeyCode::Char('i')),
        Just(KeyCode::Char('/')),
        Just(KeyCode::Char('?')),
        Just(KeyCode::Char('x')),
        Just(KeyCode::Enter),
        Just(KeyCode::Esc),
    ]
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        6 => arb_key().prop_map(Step::Key),
        1 => (0u16..200, 0u16..60).prop_map(|(w, h)| Step::Resize(w, h)),
        2 => arb_task_list().prop_map(Step::Reload),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn selection_stays_in_bounds(
        initial in arb_task_list(),
        steps in proptest::collection::vec(arb_step(), 0..80),
    ) {
        let (events, _rx) = event_channel();
        let mut session = Session::new(Supervisor::new(tasks_from(&initial), events));
        session.handle(Event::Resize { width: 100, height: 30 });

        for step in steps {
            let reloaded: Option<Vec<&str>> = match &step {
                Step::Reload(tasks) => Some(tasks.iter().map(|(name, _)| *name).collect()),
                _ => None,
            };
            let cursor_name = session.selected().map(|h| h.name().to_string());
            let pinned_name = session.pinned_handle().map(|h| h.name().to_string());

            session.handle(step.into_event());

            let len = session.supervisor().len();
            prop_assert!(len == 0 || session.cursor() < len);
            if let Some(pin) = session.pinned() {
                prop_assert!(pin < len);
            }
            prop_assert!(session.focus() != Pane::SecondaryLog || session.pinned().is_some());

            if let Some(names) = reloaded {
                prop_assert_eq!(session.supervisor().len(), names.len());
                if let Some(name) = cursor_name.filter(|n| names.contains(&n.as_str())) {
                    prop_assert_eq!(session.selected().map(|h| h.name()), Some(name.as_str()));
                }
                match pinned_name {
                    Some(name) if names.contains(&name.as_str()) => {
                        let pinned = session.pinned_handle().map(|h| h.name());
                        prop_assert_eq!(pinned, Some(name.as_str()));
                    }
                    _ => prop_assert!(session.pinned().is_none()),
                }
            }
        }
    }
}
