mod common;

use common::fixture;
use registry_core::db::ResourceKind;
use registry_core::{Dao, QueryError};

#[test]
fn failing_query_still_closes_its_statement() {
    let fixture = fixture("qual");
    let dao = Dao::connect(&fixture.provider, "qual").unwrap();

    let result = dao.run("select_missing_table", |dao| {
        let mut stmt = dao.open_statement()?;
        assert_eq!(dao.open_resources(), 1);
        let _rows = stmt
            .resource_mut()?
            .execute_query("SELECT * FROM missing_table")?;
        Ok(())
    });

    assert!(matches!(result, Err(QueryError::Sqlite(_))));
    assert_eq!(dao.open_resources(), 0);
}

#[test]
fn failing_prepare_opens_nothing() {
    let fixture = fixture("qual");
    let dao = Dao::connect(&fixture.provider, "qual").unwrap();

    assert!(dao.open_prepared_statement("SELEC name FROM nowhere").is_err());
    assert_eq!(dao.open_resources(), 0);
}

#[test]
fn row_mapping_failure_mid_iteration_closes_cursor_and_statement() {
    let fixture = fixture("qual");
    fixture.execute(
        "INSERT INTO biom_qualifiers_types (id, name) VALUES (1, 'model'), (2, 'biology');
         INSERT INTO biom_qualifiers (name, ptr_type) VALUES ('is', 1), ('hasPart', 'not-a-number');",
    );
    let dao = Dao::connect(&fixture.provider, "qual").unwrap();

    let mut seen = Vec::new();
    let result: Result<(), QueryError> = dao.run("read_pointers", |dao| {
        let mut stmt = dao.open_prepared_statement(
            "SELECT name, ptr_type FROM biom_qualifiers ORDER BY id",
        )?;
        let mut rows = dao.open_result_set(stmt.resource_mut()?.raw_query());
        assert_eq!(dao.open_resources(), 2);
        let cursor = rows.resource_mut()?;
        while let Some(row) = cursor.next()? {
            let ptr: i64 = row.get("ptr_type")?;
            seen.push(ptr);
        }
        Ok(())
    });

    assert!(matches!(result, Err(QueryError::Sqlite(_))));
    assert_eq!(seen, vec![1]);
    assert_eq!(dao.open_resources(), 0);
}

#[test]
fn explicit_close_is_idempotent_and_accepts_none() {
    let fixture = fixture("qual");
    let dao = Dao::connect(&fixture.provider, "qual").unwrap();

    let mut stmt = dao
        .open_prepared_statement("SELECT name FROM biom_qualifiers_types")
        .unwrap();
    assert_eq!(stmt.kind(), ResourceKind::PreparedStatement);
    assert_eq!(dao.open_resources(), 1);

    dao.close_prepared_statement(Some(&mut stmt));
    dao.close_prepared_statement(Some(&mut stmt));
    dao.close_prepared_statement(None);
    dao.close_statement(None);
    dao.close_result_set(None);

    assert!(stmt.is_closed());
    assert!(matches!(
        stmt.resource_mut(),
        Err(QueryError::ResourceClosed(ResourceKind::PreparedStatement))
    ));
    assert_eq!(dao.open_resources(), 0);
}

#[test]
fn plain_statement_can_be_reused_for_several_queries() {
    let fixture = fixture("qual");
    let dao = Dao::connect(&fixture.provider, "qual").unwrap();

    let mut stmt = dao.open_statement().unwrap();
    let plain = stmt.resource_mut().unwrap();
    let inserted = plain
        .execute_update("INSERT INTO biom_qualifiers_types (name) VALUES ('model'), ('biology')")
        .unwrap();
    assert_eq!(inserted, 2);

    let mut rows = plain
        .execute_query("SELECT COUNT(*) FROM biom_qualifiers_types")
        .unwrap();
    let count: i64 = rows.next().unwrap().unwrap().get(0).unwrap();
    assert_eq!(count, 2);
    drop(rows);

    dao.close_statement(Some(&mut stmt));
    assert_eq!(dao.open_resources(), 0);
}

#[test]
fn dao_release_is_idempotent_and_blocks_new_resources() {
    let fixture = fixture("qual");
    let mut dao = Dao::connect(&fixture.provider, "qual").unwrap();
    assert_eq!(dao.pool_name(), "qual");
    assert_eq!(fixture.source.checked_out(), 1);

    dao.release();
    dao.release();

    assert!(dao.is_released());
    assert_eq!(fixture.source.checked_out(), 0);
    assert!(matches!(
        dao.open_statement().err(),
        Some(QueryError::ConnectionReleased)
    ));
    assert!(matches!(
        dao.open_prepared_statement("SELECT 1").err(),
        Some(QueryError::ConnectionReleased)
    ));
}

#[test]
fn dropping_a_dao_returns_its_connection() {
    let fixture = fixture("qual");
    {
        let _dao = Dao::connect(&fixture.provider, "qual").unwrap();
        assert_eq!(fixture.source.checked_out(), 1);
    }
    assert_eq!(fixture.source.checked_out(), 0);
    assert_eq!(fixture.source.idle_count(), 1);
}

#[test]
fn connect_surfaces_provider_failures() {
    let fixture = fixture("qual");
    assert!(Dao::connect(&fixture.provider, "unknown").is_err());
}
