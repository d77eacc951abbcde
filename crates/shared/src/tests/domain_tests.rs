use super::*;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 18).expect("date")
}

fn counter(number: u8) -> CounterId {
    CounterId::new(number).expect("counter")
}

#[test]
fn service_type_parses_single_letters_only() {
    assert_eq!("a".parse::<ServiceType>().expect("lowercase"), ServiceType::REGISTRATION);
    assert_eq!(" B ".parse::<ServiceType>().expect("padded"), ServiceType::INQUIRY);
    assert!("AB".parse::<ServiceType>().is_err());
    assert!("".parse::<ServiceType>().is_err());
    assert!("7".parse::<ServiceType>().is_err());
}

#[test]
fn counter_id_bounds() {
    assert!(CounterId::new(0).is_err());
    assert!(CounterId::new(MAX_COUNTER_ID).is_ok());
    assert!(CounterId::new(MAX_COUNTER_ID + 1).is_err());
    assert_eq!("3".parse::<CounterId>().expect("parse"), counter(3));
    assert!("three".parse::<CounterId>().is_err());
}

#[test]
fn issued_ticket_derives_id_and_display_code() {
    let ticket = Ticket::issue(epoch(), ServiceType::INQUIRY, 7, Utc::now());

    assert_eq!(ticket.id.as_str(), "2026-10-18-B-7");
    assert_eq!(ticket.display_code, "B007");
    assert_eq!(ticket.status, TicketStatus::Waiting);
    assert_eq!(display_code(ServiceType::REGISTRATION, 1234), "A1234");
}

#[test]
fn document_serializes_counters_as_object_keys() {
    let document = QueueDocument::fresh(epoch(), [counter(1), counter(3)], [ServiceType::REGISTRATION]);
    let value = serde_json::to_value(&document).expect("encode");

    assert_eq!(value["schema_version"], CURRENT_SCHEMA_VERSION);
    assert_eq!(value["epoch_date"], "2026-10-18");
    assert!(value["counters_state"]["3"].is_null());
    assert_eq!(value["per_service_counters"]["A"], 0);

    let decoded: QueueDocument = serde_json::from_value(value).expect("decode");
    assert_eq!(decoded, document);
}

#[test]
fn invariant_check_reports_gaps_and_bad_slots() {
    let mut document = QueueDocument::fresh(epoch(), [counter(1)], [ServiceType::REGISTRATION]);
    document
        .tickets
        .push(Ticket::issue(epoch(), ServiceType::REGISTRATION, 1, Utc::now()));
    document
        .tickets
        .push(Ticket::issue(epoch(), ServiceType::REGISTRATION, 3, Utc::now()));
    document.per_service_counters.insert(ServiceType::REGISTRATION, 3);
    document.counters_state.insert(
        counter(1),
        Some(TicketId::new(epoch(), ServiceType::REGISTRATION, 1)),
    );

    let violations = document.check_invariants();
    assert!(violations.contains(&InvariantViolation::SequenceGap {
        service: ServiceType::REGISTRATION,
        expected: 2,
        found: 3,
    }));
    assert!(violations
        .iter()
        .any(|violation| matches!(violation, InvariantViolation::HeldTicketNotCalled { .. })));
    assert!(violations
        .iter()
        .any(|violation| matches!(violation, InvariantViolation::HeldTicketCounterMismatch { .. })));
}

#[test]
fn stored_document_recognises_each_layout() {
    let current = serde_json::to_string(&QueueDocument::fresh(
        epoch(),
        [counter(1)],
        [ServiceType::REGISTRATION],
    ))
    .expect("encode");
    assert!(matches!(
        crate::protocol::StoredDocument::parse(&current),
        Ok(crate::protocol::StoredDocument::Current(_))
    ));

    let per_counter = r#"{"tickets": [], "currentNumber": 0, "lastReset": "2026-10-18", "calledByLoket": {"1": null}}"#;
    assert!(matches!(
        crate::protocol::StoredDocument::parse(per_counter),
        Ok(crate::protocol::StoredDocument::PerCounter(_))
    ));

    let single = r#"{"tickets": [], "currentNumber": 0, "lastReset": "2026-10-18", "currentCalled": null}"#;
    assert!(matches!(
        crate::protocol::StoredDocument::parse(single),
        Ok(crate::protocol::StoredDocument::SingleCall(_))
    ));
    assert!(crate::protocol::StoredDocument::parse("[]").is_err());
}
