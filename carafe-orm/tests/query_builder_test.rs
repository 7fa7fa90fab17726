use carafe_orm::{ActionFactory, Database, FromValue, Value};

async fn setup() -> Result<std::sync::Arc<dyn carafe_orm::Action>, Box<dyn std::error::Error>> {
    let db = Database::builder().max_connections(1).connect("sqlite::memory:").await?;
    let action = ActionFactory::for_database(db);

    action
        .execute_sql("CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, age INTEGER)")
        .await?;
    action
        .execute_sql("CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER, title TEXT)")
        .await?;
    action
        .execute_sql("INSERT INTO users (name, age) VALUES ('Alice', 25), ('Bob', 30), ('Charlie', 35), ('David', 40)")
        .await?;
    action
        .execute_sql("INSERT INTO posts (user_id, title) VALUES (1, 'Hello'), (1, 'Again'), (2, 'Bob''s post')")
        .await?;

    Ok(action)
}

#[tokio::test]
async fn test_where_groups_render() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;

    let and_only = action.select().from("users", ()).where_raw("a = ?", 1).where_raw("c = ?", 2);
    assert_eq!(and_only.get_query(), "SELECT * FROM \"users\" WHERE (a = :p0 AND c = :p1)");

    let mixed = action.select().from("users", ()).where_raw("a = ?", 1).or_where_raw("b = ?", 2);
    assert_eq!(mixed.get_query(), "SELECT * FROM \"users\" WHERE (a = :p0) OR (b = :p1)");

    let grouped = action
        .select()
        .from("users", ())
        .where_raw("a = ?", 1)
        .or_where_raw("b = ?", 2)
        .where_raw("c = ?", 3);
    assert_eq!(grouped.get_query(), "SELECT * FROM \"users\" WHERE (a = :p0 AND c = :p2) OR (b = :p1)");

    // Rendering only borrows the builder
    assert_eq!(grouped.get_query(), grouped.get_query());
    assert_eq!(grouped.bindings().get("p2"), Some(&Value::Int(3)));

    Ok(())
}

#[tokio::test]
async fn test_projection_and_joins_render() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;

    let query = action
        .select()
        .from(("u", "users"), ["id", "name AS user_name", "COUNT(p.id) AS posts"])
        .join_left(("p", "posts"), "p.user_id = u.id", ())
        .group("u.id")
        .order(["u.name ASC", "u.id"])
        .limit(10);

    assert_eq!(
        query.get_query(),
        "SELECT \"u\".\"id\", \"u\".\"name\" AS \"user_name\", COUNT(p.id) AS posts \
         FROM \"users\" AS \"u\" LEFT JOIN \"posts\" AS \"p\" ON p.user_id = u.id \
         GROUP BY u.id ORDER BY u.name ASC, u.id LIMIT :__limit OFFSET :__offset"
    );

    let statement = query.to_statement();
    assert_eq!(statement.params.get("__limit"), Some(&Value::Int(10)));
    assert_eq!(statement.params.get("__offset"), Some(&Value::Int(0)));

    Ok(())
}

#[tokio::test]
async fn test_fetch_records() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;

    let rows = action
        .select()
        .from("users", ["name", "age"])
        .where_raw("age > ?", 26)
        .or_where_raw("name = ?", "Alice")
        .order("age DESC")
        .fetch_all()
        .await?;
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("David".into())));

    let page = action
        .select()
        .from("users", "name")
        .order("id")
        .limit_offset(2, 1)
        .fetch_all()
        .await?;
    let names: Vec<String> = page
        .into_iter()
        .map(|mut r| String::from_value(r.remove("name").unwrap_or(Value::Null)))
        .collect::<Result<_, _>>()?;
    assert_eq!(names, vec!["Bob", "Charlie"]);

    let missing = action.select().from("users", ()).where_raw("name = ?", "Nobody").fetch().await?;
    assert!(missing.is_none());

    Ok(())
}

#[tokio::test]
async fn test_fetch_with_join_and_aggregate() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;

    let rows = action
        .select()
        .from(("u", "users"), ["name", "COUNT(p.id) AS total"])
        .join(("p", "posts"), "p.user_id = u.id", ["title"])
        .where_expr("p.title IS NOT NULL")
        .group("u.id")
        .order("total DESC")
        .fetch_all()
        .await?;

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("name"), Some(&Value::Text("Alice".into())));
    assert_eq!(i64::from_value(rows[0]["total"].clone())?, 2);

    let quoted = action.select().from("posts", ["title"]).where_raw("title = ?", "Bob's post").fetch().await?;
    assert!(quoted.is_some());

    Ok(())
}
