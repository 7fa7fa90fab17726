use std::sync::Arc;

use carafe_orm::{Action, ActionFactory, Database, Entity, Error, FetchOptions, Fields, Model, Value};
use chrono::NaiveDateTime;

#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[orm(table = "users")]
struct User {
    id: Option<i64>,
    #[orm(column)]
    name: String,
    #[orm(column)]
    age: Option<i64>,
    #[orm(column(default = "active"))]
    status: Option<String>,
    #[orm(column(type = "datetime", default = "now()"))]
    created_at: Option<NaiveDateTime>,
    #[orm(column, hidden)]
    password: Option<String>,
    /// Not persisted
    nickname: String,
}

#[derive(Debug, Default, Clone, Entity)]
struct Country {
    #[orm(primary_key, column = "iso_code")]
    code: String,
    #[orm(column)]
    name: String,
}

async fn setup() -> Result<Arc<dyn Action>, Box<dyn std::error::Error>> {
    let db = Database::builder().max_connections(1).connect("sqlite::memory:").await?;
    let action = ActionFactory::for_database(db);
    action
        .execute_sql(
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, age INTEGER, \
             status TEXT, created_at TEXT, password TEXT)",
        )
        .await?;
    action.execute_sql("CREATE TABLE countries (iso_code TEXT PRIMARY KEY, name TEXT NOT NULL)").await?;
    Ok(action)
}

fn user(name: &str, age: i64) -> User {
    User { name: name.to_string(), age: Some(age), ..Default::default() }
}

#[tokio::test]
async fn test_save_then_find_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;

    let mut ana = user("Ana", 31);
    ana.nickname = "annie".to_string();
    assert!(ana.save(action.as_ref()).await?);

    // Generated key and defaults are written back
    assert_eq!(ana.id, Some(1));
    assert_eq!(ana.status.as_deref(), Some("active"));
    assert!(ana.created_at.is_some());

    let found = User::find(action.as_ref(), 1).await?.ok_or("user not found")?;
    assert_eq!(found.name, "Ana");
    assert_eq!(found.age, Some(31));
    assert_eq!(found.status.as_deref(), Some("active"));
    assert_eq!(found.created_at, ana.created_at);
    assert_eq!(found.nickname, "");

    assert!(User::find(action.as_ref(), 99).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_update_is_idempotent_and_partial() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;

    let mut ana = user("Ana", 31);
    ana.save(action.as_ref()).await?;

    ana.name = "Ana Maria".to_string();
    assert!(ana.save(action.as_ref()).await?);
    assert!(ana.save(action.as_ref()).await?);
    assert_eq!(User::count(action.as_ref(), Fields::new()).await?, 1);

    // NULL fields are left untouched by the update path
    let mut partial = User { id: ana.id, name: "Ana M.".to_string(), ..Default::default() };
    partial.save(action.as_ref()).await?;

    let stored = User::find(action.as_ref(), 1).await?.ok_or("user not found")?;
    assert_eq!(stored.name, "Ana M.");
    assert_eq!(stored.age, Some(31));
    assert_eq!(stored.status.as_deref(), Some("active"));

    Ok(())
}

#[tokio::test]
async fn test_find_by_returns_mapped_entities() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;
    for (name, age) in [("Ana", 31), ("Bob", 25), ("Carla", 42)] {
        user(name, age).save(action.as_ref()).await?;
    }

    let found = User::find_by(action.as_ref(), Fields::from([("name", "Ana")])).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "Ana");
    assert_eq!(found[0].id, Some(1));

    let ordered =
        User::find_all(action.as_ref(), Fields::new(), FetchOptions::new().order("age DESC").limit(2)).await?;
    let names: Vec<&str> = ordered.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["Carla", "Ana"]);

    let first = User::first_by(action.as_ref(), Fields::from([("age", 25)])).await?;
    assert_eq!(first.map(|u| u.name), Some("Bob".to_string()));

    assert!(User::exists(action.as_ref(), Fields::from([("name", "Bob")])).await?);
    assert!(!User::exists(action.as_ref(), Fields::from([("name", "Zed")])).await?);

    let adults = User::select(action.as_ref())?
        .where_raw("age >= ?", 30)
        .order("age ASC")
        .fetch_all()
        .await?;
    assert_eq!(adults.iter().map(|u| u.name.as_str()).collect::<Vec<_>>(), vec!["Ana", "Carla"]);

    let one = User::select(action.as_ref())?.where_raw("name = ?", "Bob").fetch().await?;
    assert_eq!(one.and_then(|u| u.age), Some(25));

    Ok(())
}

#[tokio::test]
async fn test_update_many_delete_and_reload() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;
    let mut ana = user("Ana", 31);
    ana.save(action.as_ref()).await?;
    user("Bob", 25).save(action.as_ref()).await?;

    User::update_many(action.as_ref(), Fields::from([("status", "inactive")]), Fields::from([("name", "Ana")]))
        .await?;
    assert_eq!(ana.status.as_deref(), Some("active"));
    assert!(ana.reload(action.as_ref()).await?);
    assert_eq!(ana.status.as_deref(), Some("inactive"));

    assert!(ana.delete(action.as_ref()).await?);
    assert!(!ana.reload(action.as_ref()).await?);
    assert_eq!(User::count(action.as_ref(), Fields::new()).await?, 1);

    // Transient entities neither delete nor reload
    let mut transient = user("Nobody", 1);
    assert!(!transient.delete(action.as_ref()).await?);
    assert!(!transient.reload(action.as_ref()).await?);

    Ok(())
}

#[tokio::test]
async fn test_insert_keeps_assigned_key() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;

    let mut br = Country { code: "BR".to_string(), name: "Brazil".to_string() };
    assert!(br.insert(action.as_ref()).await?);
    assert_eq!(br.code, "BR");

    // A set key takes the update path
    br.name = "Brasil".to_string();
    br.save(action.as_ref()).await?;

    let stored = Country::find(action.as_ref(), "BR").await?.ok_or("country not found")?;
    assert_eq!(stored.name, "Brasil");
    assert_eq!(Country::metadata()?.table_name, "countries");

    Ok(())
}

#[tokio::test]
async fn test_to_json_omits_hidden_fields() -> Result<(), Box<dyn std::error::Error>> {
    let mut ana = user("Ana", 31);
    ana.id = Some(7);
    ana.password = Some("secret".to_string());

    let json = ana.to_json()?;
    assert_eq!(json["id"], 7);
    assert_eq!(json["name"], "Ana");
    assert!(json["status"].is_null());
    assert!(json.get("password").is_none());
    assert!(json.get("nickname").is_none());

    Ok(())
}

#[test]
fn test_field_access() {
    let mut ana = user("Ana", 31);

    assert_eq!(ana.get_field("name"), Some(Value::Text("Ana".into())));
    assert_eq!(ana.get_field("nickname"), None);

    ana.set_field("age", Value::Text("40".into())).unwrap();
    assert_eq!(ana.age, Some(40));

    let err = ana.set_field("age", Value::Text("forty".into())).unwrap_err();
    assert!(matches!(err, Error::Conversion(ref msg) if msg.contains("age")), "{err}");

    let err = ana.set_field("nickname", Value::Null).unwrap_err();
    assert!(matches!(err, Error::UnknownField { entity: "User", .. }));
}
