//! SQL database and filesystem sources loaded through the demos

mod common;

use common::TestEnv;
use sluice_common::WriteDisposition;
use sluice_ingest::demos;
use sluice_ingest::sources::FileFormat;
use sluice_ingest::sources::{FileReader, FilesystemSource, RecordSource};
use sluice_ingest::resource::{Resource, ResourceConfig};
use sluice_ingest::RunOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::fs;
use std::path::Path;

async fn seed_rfam(path: &Path) -> String {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    for statement in [
        "CREATE TABLE family (rfam_acc TEXT PRIMARY KEY, rfam_id TEXT, gathering_cutoff REAL, number_of_species INTEGER)",
        "INSERT INTO family VALUES ('RF00001', '5S_rRNA', 38.0, 8921), ('RF00002', '5_8S_rRNA', 42.5, 1205), ('RF00003', 'U1', NULL, 630)",
        "CREATE TABLE genome (upid TEXT, assembly_acc TEXT, total_length INTEGER, is_reference BOOLEAN, PRIMARY KEY (upid, assembly_acc))",
        "INSERT INTO genome VALUES ('UP000005640', 'GCA_000001405.29', 3099734149, 1), ('UP000000589', 'GCA_000001635.9', 2728222451, 0)",
        "CREATE TABLE taxonomy (ncbi_id INTEGER, species TEXT)",
        "INSERT INTO taxonomy VALUES (9606, 'Homo sapiens')",
    ] {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool.close().await;

    format!("sqlite://{}", path.display())
}

#[tokio::test]
async fn test_sql_database_demo_copies_selected_tables() {
    let env = TestEnv::new();
    let url = seed_rfam(&env.dir.path().join("rfam.db")).await;

    let report = demos::sql_database(&env.config, &url, None).await.unwrap();
    assert!(!report.has_failed(), "{}", report);
    assert_eq!(report.rows_written("family"), Some(3));
    assert_eq!(report.rows_written("genome"), Some(2));
    assert_eq!(report.rows_written("taxonomy"), None);

    let pipeline = "sql_to_sqlite_pipeline";
    assert_eq!(
        env.count(pipeline, "SELECT number_of_species FROM family WHERE rfam_acc = 'RF00002'")
            .await,
        1205
    );
    assert_eq!(
        env.count(pipeline, "SELECT COUNT(*) FROM family WHERE gathering_cutoff IS NULL")
            .await,
        1
    );

    // Default disposition appends
    demos::sql_database(&env.config, &url, None).await.unwrap();
    assert_eq!(env.count(pipeline, "SELECT COUNT(*) FROM genome").await, 4);

    demos::sql_database(&env.config, &url, Some(WriteDisposition::Replace))
        .await
        .unwrap();
    assert_eq!(env.count(pipeline, "SELECT COUNT(*) FROM genome").await, 2);

    // Reflected composite key drives merge
    demos::sql_database(&env.config, &url, Some(WriteDisposition::Merge))
        .await
        .unwrap();
    assert_eq!(env.count(pipeline, "SELECT COUNT(*) FROM genome").await, 2);
}

#[tokio::test]
async fn test_sql_database_demo_with_missing_table_fails() {
    let env = TestEnv::new();
    let path = env.dir.path().join("empty.db");
    let options = SqliteConnectOptions::new().filename(&path).create_if_missing(true);
    SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .unwrap()
        .close()
        .await;

    let result = demos::sql_database(&env.config, &format!("sqlite://{}", path.display()), None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_filesystem_demo_picks_up_new_files_only() {
    let env = TestEnv::new();
    let input = env.dir.path().join("files");
    fs::create_dir_all(&input).unwrap();
    fs::write(
        input.join("encounters_a.csv"),
        "Id,START,STOP,ENCOUNTERCLASS,BASE_ENCOUNTER_COST\n\
         a1,2020-01-01T08:00:00Z,2020-01-01T09:00:00Z,wellness,129.16\n\
         a2,2020-01-05T08:00:00Z,2020-01-05T09:00:00Z,ambulatory,129.16\n",
    )
    .unwrap();

    let first = demos::filesystem(&env.config, &input).await.unwrap();
    assert_eq!(first.rows_written("encounters"), Some(2));
    assert_eq!(first.tables[0].write_disposition, WriteDisposition::Merge);

    // Only rows past the last STOP are loaded from a new file
    fs::write(
        input.join("encounters_b.csv"),
        "Id,START,STOP,ENCOUNTERCLASS,BASE_ENCOUNTER_COST\n\
         b1,2019-12-01T08:00:00Z,2019-12-01T09:00:00Z,wellness,129.16\n\
         b2,2020-02-01T08:00:00Z,2020-02-01T09:00:00Z,emergency,\n",
    )
    .unwrap();

    let second = demos::filesystem(&env.config, &input).await.unwrap();
    assert_eq!(second.rows_written("encounters"), Some(1));

    let pipeline = "filesystem_pipeline";
    assert_eq!(env.count(pipeline, "SELECT COUNT(*) FROM encounters").await, 3);
    assert_eq!(
        env.count(
            pipeline,
            "SELECT COUNT(*) FROM encounters WHERE file_name = 'encounters_b.csv' \
             AND encounterclass = 'emergency' AND base_encounter_cost IS NULL"
        )
        .await,
        1
    );
    assert_eq!(
        env.count(pipeline, "SELECT COUNT(DISTINCT id) FROM encounters").await,
        3
    );

    // Encounter ids survive next to the generated row ids
    assert_eq!(
        env.count(
            pipeline,
            "SELECT COUNT(*) FROM encounters WHERE id IN ('a1', 'a2', 'b2')"
        )
        .await,
        3
    );
    assert_eq!(
        env.count(
            pipeline,
            &format!(
                "SELECT COUNT(DISTINCT {}) FROM encounters",
                demos::ROW_ID_COLUMN
            )
        )
        .await,
        3
    );
}

#[tokio::test]
async fn test_file_listing_loads_file_metadata() {
    let env = TestEnv::new();
    let input = env.dir.path().join("files");
    fs::create_dir_all(input.join("nested")).unwrap();
    fs::write(input.join("a.jsonl"), "{\"id\": 1}\n").unwrap();
    fs::write(input.join("nested/b.jsonl"), "{\"id\": 2}\n{\"id\": 3}\n").unwrap();
    fs::write(input.join("notes.txt"), "ignored").unwrap();

    let pipeline = env.pipeline("listing").await;
    let listing = Resource::new(
        ResourceConfig::new("files"),
        RecordSource::Filesystem(FilesystemSource::new(&input, "**/*.jsonl")),
    );
    let report = pipeline.run(listing, RunOptions::new()).await.unwrap();
    assert_eq!(report.rows_written("files"), Some(2));
    assert_eq!(
        env.count("listing", "SELECT SUM(size_in_bytes) FROM files").await,
        30
    );

    let rows = Resource::new(
        ResourceConfig::new("rows"),
        RecordSource::FileReader(
            FileReader::new(FilesystemSource::new(&input, "**/*.jsonl"))
                .format(FileFormat::JsonLines)
                .chunk_size(1),
        ),
    );
    let report = pipeline.run(rows, RunOptions::new()).await.unwrap();
    assert_eq!(report.rows_written("rows"), Some(3));
}
