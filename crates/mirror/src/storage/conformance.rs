//! Behavior every `MailStore` implementation must share

use chrono::{Duration, TimeZone, Utc};

use super::{MailStore, UpsertOutcome};
use crate::models::{Account, Email, EmailId, Folder, RemoteId, SyncState, ThreadId};
use crate::query::EmailQuery;

fn email(remote_id: &str, minutes: i64) -> Email {
    Email::builder(ThreadId::new("t1"))
        .remote_id(remote_id)
        .from("Sarah Chen <sarah@techcorp.com>")
        .to("me@gmail.com")
        .subject(format!("Subject {}", remote_id))
        .body_text(format!("Body of {}", remote_id))
        .sent_at(Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes))
        .build()
}

pub fn upsert_semantics(store: &dyn MailStore) {
    let original = email("r1", 0);
    let outcome = store.upsert_email(original.clone()).unwrap();
    assert!(outcome.is_inserted());

    // Identical state is a no-op
    let again = email("r1", 0);
    assert!(matches!(
        store.upsert_email(again).unwrap(),
        UpsertOutcome::Unchanged(_)
    ));

    // Only read/star change; identity and content are kept
    let mut changed = email("r1", 30);
    changed.is_read = true;
    changed.is_starred = true;
    changed.subject = "Rewritten".to_string();
    let UpsertOutcome::Updated(updated) = store.upsert_email(changed).unwrap() else {
        panic!("expected update");
    };
    assert_eq!(updated.id, original.id);
    assert_eq!(updated.subject, original.subject);
    assert_eq!(updated.sent_at, original.sent_at);
    assert!(updated.is_read);
    assert!(updated.is_starred);

    let stored = store.get_by_remote_id(&RemoteId::new("r1")).unwrap().unwrap();
    assert_eq!(stored, updated);
    assert_eq!(store.count_emails().unwrap(), 1);
}

pub fn synthetic_emails_always_insert(store: &dyn MailStore) {
    let a = Email::builder(ThreadId::new("local")).folder(Folder::Sent).build();
    let b = Email::builder(ThreadId::new("local")).folder(Folder::Sent).build();
    assert!(store.upsert_email(a).unwrap().is_inserted());
    assert!(store.upsert_email(b).unwrap().is_inserted());
    assert_eq!(store.count_emails().unwrap(), 2);
}

pub fn find_by_local_or_remote_id(store: &dyn MailStore) {
    let stored = store.upsert_email(email("r1", 0)).unwrap().into_email();

    let by_local = store.find_email(stored.id.as_str()).unwrap().unwrap();
    let by_remote = store.find_email("r1").unwrap().unwrap();
    assert_eq!(by_local.id, stored.id);
    assert_eq!(by_remote.id, stored.id);
    assert!(store.find_email("missing").unwrap().is_none());
    assert!(store.has_remote_id(&RemoteId::new("r1")).unwrap());
    assert!(!store.has_remote_id(&RemoteId::new("r2")).unwrap());
}

pub fn query_ordering_and_filters(store: &dyn MailStore) {
    store.upsert_email(email("older", 0)).unwrap();
    store.upsert_email(email("tie-a", 10)).unwrap();
    store.upsert_email(email("tie-b", 10)).unwrap();
    let mut newest = email("newest", 20);
    newest.is_read = true;
    store.upsert_email(newest).unwrap();
    let mut sent = email("sent", 30);
    sent.folder = Folder::Sent;
    store.upsert_email(sent).unwrap();

    let inbox = store.query_emails(&EmailQuery::folder(Folder::Inbox)).unwrap();
    let ids: Vec<&str> = inbox
        .iter()
        .map(|e| e.remote_id.as_ref().unwrap().as_str())
        .collect();
    assert_eq!(ids, vec!["newest", "tie-a", "tie-b", "older"]);

    let unread = store
        .query_emails(&EmailQuery {
            folder: Some(Folder::Inbox),
            unread_only: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(unread.len(), 3);

    let keyword = store
        .query_emails(&EmailQuery {
            keyword: Some("BODY OF TIE".to_string()),
            limit: Some(1),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(keyword.len(), 1);
    assert_eq!(keyword[0].remote_id.as_ref().unwrap().as_str(), "tie-a");

    let window = store
        .query_emails(&EmailQuery {
            date_from: Some(Utc.with_ymd_and_hms(2025, 1, 1, 9, 5, 0).unwrap()),
            date_to: Some(Utc.with_ymd_and_hms(2025, 1, 1, 9, 25, 0).unwrap()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(window.len(), 3);

    let limited = store
        .query_emails(&EmailQuery {
            limit: Some(2),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].remote_id.as_ref().unwrap().as_str(), "sent");
}

pub fn flag_updates(store: &dyn MailStore) {
    let stored = store.upsert_email(email("r1", 0)).unwrap().into_email();

    let read = store.set_read(&stored.id, true).unwrap().unwrap();
    assert!(read.is_read);

    let starred = store.toggle_starred(&stored.id).unwrap().unwrap();
    assert!(starred.is_starred);
    let unstarred = store.toggle_starred(&stored.id).unwrap().unwrap();
    assert!(!unstarred.is_starred);

    let starred = store.toggle_starred(&stored.id).unwrap().unwrap();
    assert!(starred.is_starred);
    assert!(starred.is_read);

    let missing = EmailId::new("nope");
    assert!(store.set_read(&missing, true).unwrap().is_none());
    assert!(store.toggle_starred(&missing).unwrap().is_none());
}

pub fn thread_listing(store: &dyn MailStore) {
    store.upsert_email(email("second", 10)).unwrap();
    store.upsert_email(email("first", 0)).unwrap();
    let other = Email::builder(ThreadId::new("t2")).remote_id("x").build();
    store.upsert_email(other).unwrap();

    let thread = store.list_thread(&ThreadId::new("t1")).unwrap();
    let ids: Vec<&str> = thread
        .iter()
        .map(|e| e.remote_id.as_ref().unwrap().as_str())
        .collect();
    assert_eq!(ids, vec!["first", "second"]);
}

pub fn clear_mail_data_keeps_session_state(store: &dyn MailStore) {
    store.upsert_email(email("r1", 0)).unwrap();
    store.save_sync_state(SyncState::new("me@gmail.com", "100")).unwrap();

    store.clear_mail_data().unwrap();

    assert_eq!(store.count_emails().unwrap(), 0);
    assert!(!store.has_remote_id(&RemoteId::new("r1")).unwrap());
    assert!(store.get_sync_state("me@gmail.com").unwrap().is_some());

    // The same remote id can be mirrored again
    assert!(store.upsert_email(email("r1", 0)).unwrap().is_inserted());
}

pub fn revocations(store: &dyn MailStore) {
    let now = Utc::now();
    store.revoke_token("old", now - Duration::hours(1)).unwrap();
    store.revoke_token("live", now + Duration::hours(1)).unwrap();

    assert!(store.is_token_revoked("old").unwrap());
    assert!(store.is_token_revoked("live").unwrap());
    assert!(!store.is_token_revoked("other").unwrap());

    assert_eq!(store.purge_expired_revocations(now).unwrap(), 1);
    assert!(!store.is_token_revoked("old").unwrap());
    assert!(store.is_token_revoked("live").unwrap());
}

pub fn account_roundtrip(store: &dyn MailStore) {
    assert!(store.load_account().unwrap().is_none());

    let account = Account::new("me@gmail.com", "1//refresh").with_display_name("Me");
    store.save_account(&account).unwrap();
    let loaded = store.load_account().unwrap().unwrap();
    assert_eq!(loaded.email, "me@gmail.com");
    assert_eq!(loaded.refresh_token, "1//refresh");
    assert_eq!(loaded.display_name.as_deref(), Some("Me"));

    let replacement = Account::new("other@gmail.com", "1//other");
    store.save_account(&replacement).unwrap();
    assert_eq!(store.load_account().unwrap().unwrap().email, "other@gmail.com");

    store.delete_account().unwrap();
    assert!(store.load_account().unwrap().is_none());
}
