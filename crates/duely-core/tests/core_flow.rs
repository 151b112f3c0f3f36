use std::cell::RefCell;

use chrono::{Duration, NaiveDate};
use duely_core::error::NotifyError;
use duely_core::gateway::{Gateway, ItemStore};
use duely_core::item::{DueItem, NewDueItem};
use duely_core::notify::Notifier;
use duely_core::session::{Outcome, Session};
use duely_core::urgency::Tier;
use tempfile::tempdir;

#[derive(Default)]
struct Recorder {
    titles: RefCell<Vec<String>>,
}

impl Notifier for Recorder {
    fn notify(&self, title: &str, _body: &str) -> Result<(), NotifyError> {
        self.titles.borrow_mut().push(title.to_string());
        Ok(())
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[test]
fn gateway_roundtrip_and_ordering() {
    let temp = tempdir().expect("tempdir");
    let gateway = Gateway::open(temp.path()).expect("open gateway");
    let updates = gateway.observe_all();

    let mut ids = Vec::new();
    for (name, due) in [
        ("passport", date(2025, 3, 1)),
        ("gift", date(2024, 12, 25)),
        ("visa", date(2025, 1, 10)),
    ] {
        let item = gateway
            .insert(NewDueItem::new(name, due))
            .expect("insert should succeed");
        assert!(!ids.contains(&item.id));
        ids.push(item.id);
    }

    let latest = updates.try_iter().last().expect("snapshot emitted");
    let dates: Vec<NaiveDate> = latest.iter().map(|item| item.due_date).collect();
    assert_eq!(
        dates,
        vec![date(2024, 12, 25), date(2025, 1, 10), date(2025, 3, 1)]
    );

    drop(gateway);
    let reopened = Gateway::open(temp.path()).expect("reopen gateway");
    assert_eq!(reopened.snapshot(), latest);
}

#[test]
fn deleting_absent_item_is_a_no_op() {
    let temp = tempdir().expect("tempdir");
    let gateway = Gateway::open(temp.path()).expect("open gateway");
    let kept = gateway
        .insert(NewDueItem::new("milk", date(2025, 1, 1)))
        .expect("insert");
    let updates = gateway.observe_all();
    let before = updates.recv().expect("initial snapshot");

    let ghost = DueItem {
        id: 404,
        name: "ghost".to_string(),
        due_date: date(2025, 1, 1),
    };
    gateway.delete(&ghost).expect("absent delete is fine");
    gateway.delete(&ghost).expect("and stays fine");

    assert!(updates.try_recv().is_err());
    assert_eq!(gateway.snapshot(), before);
    assert_eq!(before, vec![kept]);
}

#[test]
fn session_end_to_end() {
    let temp = tempdir().expect("tempdir");
    let gateway = Gateway::open(temp.path()).expect("open gateway");
    let notifier = Recorder::default();
    let today = date(2026, 2, 17);
    let mut session = Session::new(&gateway, &notifier, today);
    session.refresh();

    session.set_name("Milk");
    session.open_date_picker();
    session.pick_date(today + Duration::days(30));
    session.confirm_date();
    let milk = match session.submit() {
        Outcome::Applied(item) => item,
        other => panic!("unexpected outcome: {other:?}"),
    };

    let rows = session.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].urgency.tier, Tier::Near);
    assert_eq!(rows[0].urgency.days_until_due, 30);
    assert_eq!(notifier.titles.borrow().len(), 1);

    session.refresh();
    let _ = session.rows();
    assert_eq!(notifier.titles.borrow().len(), 1);

    // A second session seeded with the ledger stays quiet.
    let ledger = session.notified().clone();
    drop(session);
    let mut resumed = Session::new(&gateway, &notifier, today).with_notified(ledger);
    resumed.refresh();
    assert_eq!(notifier.titles.borrow().len(), 1);

    assert_eq!(resumed.delete(milk.id), Outcome::Applied(()));
    assert!(resumed.rows().is_empty());
    assert!(resumed.notified().is_empty());
}
