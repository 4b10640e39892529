//! Thin demo binary: builds a table, runs a handful of canned `select()`
//! queries against it, and prints the resulting tuples — the
//! programmatic equivalent of `hustle`'s `bin/peek.py`/`bin/space.py`
//! tools. A REPL and human-readable pretty-printing are out of scope;
//! this exists so the crate is runnable end to end.

use marbledb::aggregation::Aggregator;
use marbledb::column::Column;
use marbledb::config::EngineConfig;
use marbledb::marble::writer::{MarbleWriter, Record};
use marbledb::pipeline::{select, LocalRunner, Query, Select};
use marbledb::predicate::{CmpOp, Expr, Literal};
use marbledb::tuple::Value;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn schema() -> Vec<Column> {
    vec![
        Column::parse("+$date", Some("date")).unwrap(),
        Column::parse("=@4ad_id", None).unwrap(),
        Column::parse("+site", None).unwrap(),
    ]
}

fn record(date: &str, ad_id: i64, site: &str) -> Record {
    let mut r = Record::new();
    r.insert("date".to_string(), Value::from(date));
    r.insert("ad_id".to_string(), Value::Int(ad_id));
    r.insert("site".to_string(), Value::from(site));
    r
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).unwrap();
    fmt().with_env_filter(filter).init();

    let scratch = std::env::temp_dir().join(format!("marbledb-cli-{}", std::process::id()));
    std::fs::create_dir_all(&scratch)?;
    let config = Arc::new(EngineConfig::default());

    info!(target: "marbledb::cli", "building demo table 'impressions'");
    let mut writer = MarbleWriter::new("impressions", schema(), &scratch, config)?;
    writer.write_all([
        record("2014-01-27", 10, "a.com"),
        record("2014-01-27", 20, "b.com"),
        record("2014-01-28", 10, "a.com"),
        record("2014-01-28", 10, "a.com"),
    ])?;
    let sealed = writer.close()?;
    let partitions: Vec<_> = sealed.into_iter().map(|s| (s.partition_tag, s.path)).collect();
    info!(target: "marbledb::cli", partitions = partitions.len(), "sealed demo partitions");

    let cols = schema();

    println!("-- all rows where ad_id = 10 --");
    let query = Query::new(vec![Select::Column(cols[0].clone()), Select::Column(cols[2].clone())])
        .r#where(Expr::compare(&cols[1], CmpOp::Eq, Literal::Scalar(Value::Int(10)))?);
    for tuple in select(&partitions, query, &LocalRunner)?.into_tuples() {
        println!("{:?}", tuple.values);
    }

    println!("-- count of impressions per site --");
    let query = Query::new(vec![Select::Column(cols[2].clone()), Select::Agg(Aggregator::Count, cols[1].clone())]);
    for tuple in select(&partitions, query, &LocalRunner)?.into_tuples() {
        println!("{:?}", tuple.values);
    }

    Ok(())
}
