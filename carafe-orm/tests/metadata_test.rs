use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use carafe_orm::{
    ColumnDefault, ColumnType, Entity, EntitySchema, Error, FieldSchema, Metadata, RelationKind, Value,
};

static SCHEMA_CALLS: AtomicUsize = AtomicUsize::new(0);

/// Hand-written entity that counts how often its schema is read.
#[derive(Debug, Default)]
struct Counted {
    id: Option<i64>,
}

impl Entity for Counted {
    fn schema() -> EntitySchema {
        SCHEMA_CALLS.fetch_add(1, Ordering::SeqCst);
        EntitySchema::new("Counted").field(FieldSchema::new("id", ColumnType::Integer, true))
    }

    fn get_field(&self, field: &str) -> Option<Value> {
        (field == "id").then(|| Value::from(self.id))
    }

    fn set_field(&mut self, field: &str, value: Value) -> Result<(), Error> {
        match field {
            "id" => {
                self.id = carafe_orm::FromValue::from_value(value)?;
                Ok(())
            }
            _ => Err(Error::UnknownField { entity: "Counted", field: field.to_string() }),
        }
    }
}

#[test]
fn test_metadata_is_memoized() -> Result<(), Box<dyn std::error::Error>> {
    let handles: Vec<_> = (0..8).map(|_| std::thread::spawn(Counted::metadata)).collect();
    let resolved = handles
        .into_iter()
        .map(|h| -> Result<Arc<Metadata>, Box<dyn std::error::Error>> {
            Ok(h.join().map_err(|_| "resolver thread panicked")??)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let first = Counted::metadata()?;
    for meta in &resolved {
        assert!(Arc::ptr_eq(&first, meta));
    }

    // Racing first calls may compute more than once, later calls never do
    let calls = SCHEMA_CALLS.load(Ordering::SeqCst);
    let again = Counted::metadata()?;
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(SCHEMA_CALLS.load(Ordering::SeqCst), calls);
    assert_eq!(first.table_name, "counteds");

    Ok(())
}

#[derive(Debug, Default, Entity)]
#[orm(has_many(Comment))]
struct BlogPost {
    #[orm(primary_key, column = "post_id")]
    key: Option<i64>,
    #[orm(column(name = "headline", length = 120))]
    title: String,
    #[orm(column(type = "datetime", default = "now()"))]
    published_at: Option<String>,
    #[orm(column(default = "3"))]
    rating: i64,
    #[orm(column, hidden)]
    secret: Option<String>,
    draft_notes: String,
}

#[derive(Debug, Default, Entity)]
struct Comment {
    id: i64,
    #[orm(column, belongs_to(BlogPost, owner_key = "post_id"))]
    blog_post_id: Option<i64>,
}

#[test]
fn test_resolves_declared_schema() -> Result<(), Box<dyn std::error::Error>> {
    let meta = BlogPost::metadata()?;

    assert_eq!(meta.table_name, "blog_posts");
    assert_eq!(meta.primary_key.field, "key");
    assert_eq!(meta.primary_key.column, "post_id");

    let columns: Vec<&str> = meta.columns.iter().map(|c| c.column.as_str()).collect();
    assert_eq!(columns, vec!["post_id", "headline", "published_at", "rating", "secret"]);
    assert!(meta.column_for_field("draft_notes").is_none());

    let headline = meta.field_for_column("headline").ok_or("headline not mapped")?;
    assert_eq!(headline.length, Some(120));
    assert_eq!(headline.column_type, ColumnType::String);
    assert!(!headline.nullable);

    let published = meta.column_for_field("published_at").ok_or("published_at not mapped")?;
    assert_eq!(published.column_type, ColumnType::DateTime);
    assert!(published.nullable);
    assert_eq!(published.default, Some(ColumnDefault::Now));

    let rating = meta.column_for_field("rating").ok_or("rating not mapped")?;
    assert_eq!(rating.default, Some(ColumnDefault::Value(Value::Int(3))));

    assert!(meta.is_hidden("secret"));
    assert!(meta.relation(RelationKind::HasMany, std::any::TypeId::of::<Comment>()).is_some());

    let comment = Comment::metadata()?;
    let owner = comment
        .relation(RelationKind::BelongsTo, std::any::TypeId::of::<BlogPost>())
        .ok_or("belongs_to not declared")?;
    assert_eq!(owner.field, Some("blog_post_id"));
    assert_eq!(owner.owner_key, Some("post_id"));

    Ok(())
}
