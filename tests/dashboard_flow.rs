use bitterguard_dash::report::{generate_report, report_file_name, ReportError};
use bitterguard_dash::sqlite::{init_schema, SqliteBackend};
use bitterguard_dash::{refresh, FilterState, Taxonomy, TimeScope};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 15, 30, 0).unwrap()
}

fn seeded_connection() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();

    let scans = [
        ("s1", "u1", "Mosaic Virus (low confidence)", "0.744", "Barangay San Jose, Tarlac", 0),
        ("s2", "u2", "mosaic virus", "81.5%", "Barangay San Jose, Tarlac", 1),
        ("s3", "u1", "No disease detected", "EMPTY", "Barangay San Jose, Tarlac", 3),
        ("s4", "u3", "Walang nakitang dahon", "0.99", "Poblacion", 5),
        ("s5", "u2", "Downy mildew", "66", "Poblacion", 45),
    ];
    for (id, user, prediction, confidence, location, days_ago) in scans {
        let ts = (now() - Duration::days(days_ago)).timestamp_millis();
        conn.execute(
            "INSERT INTO history (id, user_id, prediction, confidence, location, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, user, prediction, confidence, location, ts.to_string()],
        )
        .unwrap();
    }
    conn.execute(
        "INSERT INTO users (id, email, phone) VALUES ('u1', 'ana@example.com', NULL), ('u2', NULL, '09171234567')",
        [],
    )
    .unwrap();
    conn
}

#[test]
fn test_dashboard_for_location() {
    let backend = SqliteBackend::from_connection(seeded_connection()).unwrap();
    let filter = FilterState::new("San Jose", TimeScope::All, None, None);
    let snapshot = refresh(&backend, &Taxonomy::default(), &filter, &now(), 10, false);

    assert_eq!(snapshot.total_scans, Ok(3));
    assert_eq!(snapshot.total_users, Ok(2));
    assert_eq!(snapshot.scans_today, Ok(1));
    assert_eq!(snapshot.active_users, Ok(2));

    let categories = snapshot.categories.as_ref().unwrap();
    let mosaic = categories.get("Mosaic Virus").unwrap();
    assert_eq!(mosaic.count, 2);
    assert_eq!(mosaic.percentage, 66.7);
    assert_eq!(categories.get("No Disease Detected").unwrap().percentage, 33.3);

    let series = snapshot.scans_over_time.as_ref().unwrap();
    assert_eq!(series.len(), 7);
    assert_eq!(series.iter().map(|d| d.count).sum::<u32>(), 3);

    let recent = snapshot.recent_scans.as_ref().unwrap();
    assert_eq!(recent[0].id, "s1");
    assert_eq!(recent[0].confidence, "74.4%");
    assert_eq!(recent[0].user, "ana@example.com");
    assert_eq!(recent[1].user, "09171234567");
    assert_eq!(recent[2].confidence, "—");
}

#[test]
fn test_report_export() {
    let backend = SqliteBackend::from_connection(seeded_connection()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let filter = FilterState::new("", TimeScope::ByYear, Some(2026), None);

    let summary =
        generate_report(&backend, &Taxonomy::default(), &filter, &now(), dir.path(), true).unwrap();
    assert_eq!(summary.total, 5);
    assert_eq!(summary.range, "Year 2026");
    assert_eq!(summary.location, "All Barangays");
    assert_eq!(summary.path, dir.path().join(report_file_name(now().date_naive())));
    assert_eq!(summary.labels[0], ("Mosaic Virus".to_string(), 2));

    let csv = std::fs::read_to_string(&summary.path).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 6);
    assert!(lines[0].starts_with(r#""ID","User Email""#));
    assert!(lines[1].starts_with(r#""s1","a**@example.com","N/A","Mosaic Virus","74.4%""#));
    assert!(lines[4].contains(r#""No Bitter Gourd Leaf Detected","N/A""#));
    assert!(lines[5].contains(r#""Downey Mildew","66.0%""#));
}

#[test]
fn test_report_without_matches() {
    let backend = SqliteBackend::from_connection(seeded_connection()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let filter = FilterState::new("Nowhere", TimeScope::All, None, None);

    let err = generate_report(&backend, &Taxonomy::default(), &filter, &now(), dir.path(), false)
        .unwrap_err();
    assert!(matches!(err, ReportError::NoData));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
