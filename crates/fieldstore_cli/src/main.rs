//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `fieldstore_core` linkage.
//! - Run each storage strategy once against an in-memory database.

use fieldstore_core::db::open_db_in_memory;
use fieldstore_core::{
    ChildStorage, EditId, Field, FieldStorage, FieldStorageService, FieldValue, ScopedStorage,
    SqliteTableRepository, SqliteTranslationRepository,
};
use std::error::Error;
use std::process::ExitCode;

const DEMO_SCHEMA: &str = "
    CREATE TABLE page (id INTEGER PRIMARY KEY, title_key INTEGER);
    CREATE TABLE page_language (page_id INTEGER NOT NULL, lang TEXT, title TEXT);
    CREATE TABLE page_tag (page_id INTEGER NOT NULL, tag_id INTEGER NOT NULL);
    CREATE TABLE block (id INTEGER PRIMARY KEY, page_id INTEGER);
    INSERT INTO page (id) VALUES (7);
    INSERT INTO block (id, page_id) VALUES (10, 0), (11, 0);
";

fn main() -> ExitCode {
    println!("fieldstore_core ping={}", fieldstore_core::ping());
    println!("fieldstore_core version={}", fieldstore_core::core_version());

    match run_demo() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("demo failed: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_demo() -> Result<(), Box<dyn Error>> {
    let conn = open_db_in_memory()?;
    conn.execute_batch(DEMO_SCHEMA)?;
    let service = FieldStorageService::new(
        SqliteTableRepository::new(&conn),
        SqliteTranslationRepository::new(&conn),
    );
    let page = EditId::from(7);

    let title = Field::new(
        "title",
        FieldStorage::one_to_one(
            ScopedStorage::new("page_language", "page_id")?.scoped_by_language("lang")?,
        ),
    )?;
    service.store(&title, &FieldValue::from("Hello"), page, Some("en"))?;
    service.store(&title, &FieldValue::from("Hi"), page, Some("en"))?;
    println!(
        "one_to_one title={:?}",
        service.retrieve_one_to_one(&title, 7, Some("en"))?
    );

    let tags = Field::new(
        "tag_id",
        FieldStorage::many_to_many(ScopedStorage::new("page_tag", "page_id")?),
    )?;
    service.store(&tags, &FieldValue::list([1_i64, 2, 3]), page, None)?;
    println!(
        "many_to_many tags={:?}",
        service.retrieve_many_to_many(&tags, 7, None)?
    );

    let blocks = Field::new(
        "blocks",
        FieldStorage::one_to_many(ChildStorage::new("block", "page_id")?),
    )?;
    let report = service.store(&blocks, &FieldValue::list([10_i64, 11]), page, None)?;
    println!("one_to_many adopted={}", report.rows_written);

    let heading = Field::new(
        "title_key",
        FieldStorage::one_to_one(ScopedStorage::new("page", "id")?),
    )?;
    let key_id = service.store_translation(&heading, Some("Welkom"), page, Some("nl"))?;
    println!(
        "translation key={key_id} nl={:?}",
        service.retrieve_translation(&heading, page, Some("nl"))?
    );

    Ok(())
}
