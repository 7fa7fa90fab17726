use std::sync::Arc;

use carafe_orm::{Action, ActionFactory, Database, Entity, Model, Value};

fn no_admin(field: &str, value: &Value) -> Option<String> {
    match value {
        Value::Text(s) if s.eq_ignore_ascii_case("admin") => Some(format!("the field '{}' is reserved", field)),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Entity)]
#[orm(table = "accounts")]
struct Account {
    id: Option<i64>,
    #[orm(column, validate(required, min_length = 3, max_length(value = 12, message = "name is too long"), with = "no_admin"))]
    name: String,
    #[orm(column, validate(email(message = "invalid e-mail"), unique))]
    email: String,
    #[orm(column, validate(number_range(min = 1, max = 10)))]
    level: Option<i64>,
    #[orm(column, validate(regex = "^[A-Z]{2}$"))]
    country: Option<String>,
    #[orm(column, validate(date_format, is_past_date))]
    birthday: Option<String>,
    #[orm(column, validate(date_range(start = "2024-01-01", end = "2024-12-31", format = "%Y-%m-%d")))]
    joined_on: Option<String>,
    #[orm(column, validate(time_format(format = "%H:%M")))]
    alarm: Option<String>,
    #[orm(validate(not_empty))]
    accepted: bool,
}

#[derive(Debug, Default, Clone, Entity)]
#[orm(table = "accounts")]
struct Signup {
    id: Option<i64>,
    #[orm(column = "name", validate(required))]
    nickname: Option<String>,
    #[orm(column = "country", validate(number_range(min = 1, max = 10)))]
    code: Option<String>,
}

async fn setup() -> Result<Arc<dyn Action>, Box<dyn std::error::Error>> {
    let db = Database::builder().max_connections(1).connect("sqlite::memory:").await?;
    let action = ActionFactory::for_database(db);
    action
        .execute_sql(
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, email TEXT, level INTEGER, \
             country TEXT, birthday TEXT, joined_on TEXT, alarm TEXT)",
        )
        .await?;
    Ok(action)
}

fn valid_account() -> Account {
    Account {
        name: "Ana".to_string(),
        email: "ana@example.com".to_string(),
        level: Some(5),
        country: Some("BR".to_string()),
        birthday: Some("1990-05-17".to_string()),
        joined_on: Some("2024-06-01".to_string()),
        alarm: Some("07:30".to_string()),
        accepted: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_valid_entity_passes() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;

    let account = valid_account();
    let errors = account.errors(action.as_ref()).await?;
    assert!(errors.is_empty(), "{errors}");
    assert!(account.is_valid(action.as_ref()).await?);

    Ok(())
}

#[tokio::test]
async fn test_failures_accumulate() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;

    let account = Account {
        name: String::new(),
        email: "not-an-email".to_string(),
        level: Some(11),
        country: Some("Brazil".to_string()),
        birthday: Some("17/05/1990".to_string()),
        joined_on: Some("2025-01-01".to_string()),
        alarm: Some("7h30".to_string()),
        accepted: false,
        ..Default::default()
    };

    let errors = account.errors(action.as_ref()).await?;
    assert!(!account.is_valid(action.as_ref()).await?);

    // Required and MinLength both fire on the empty name
    assert_eq!(errors.get("name").map(<[String]>::len), Some(2));
    assert_eq!(errors.get("email"), Some(&["invalid e-mail".to_string()][..]));
    for field in ["level", "country", "birthday", "joined_on", "alarm", "accepted"] {
        assert!(errors.get(field).is_some(), "expected an error for {field}: {errors}");
    }

    Ok(())
}

#[tokio::test]
async fn test_number_range_and_custom_messages() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;

    for (level, ok) in [(1, true), (10, true), (0, false), (11, false)] {
        let account = Account { level: Some(level), ..valid_account() };
        assert_eq!(account.errors(action.as_ref()).await?.get("level").is_none(), ok, "level {level}");
    }

    let missing = Account { level: None, ..valid_account() };
    let errors = missing.errors(action.as_ref()).await?;
    assert_eq!(errors.get("level"), Some(&["the field 'level' must be numeric".to_string()][..]));

    let long = Account { name: "Anastasia Maria".to_string(), ..valid_account() };
    let errors = long.errors(action.as_ref()).await?;
    assert_eq!(errors.get("name"), Some(&["name is too long".to_string()][..]));

    let reserved = Account { name: "Admin".to_string(), ..valid_account() };
    let errors = reserved.errors(action.as_ref()).await?;
    assert_eq!(errors.get("name"), Some(&["the field 'name' is reserved".to_string()][..]));

    Ok(())
}

#[tokio::test]
async fn test_unique_ignores_own_row() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;

    let mut ana = valid_account();
    ana.save(action.as_ref()).await?;

    // Updating the stored row keeps its own e-mail valid
    assert!(ana.errors(action.as_ref()).await?.get("email").is_none());

    let copycat = Account { name: "Bob".to_string(), ..valid_account() };
    let errors = copycat.errors(action.as_ref()).await?;
    assert_eq!(errors.get("email"), Some(&["the value of 'email' is already in use".to_string()][..]));

    let other = Account { name: "Bob".to_string(), email: "bob@example.com".to_string(), ..valid_account() };
    assert!(other.is_valid(action.as_ref()).await?);

    Ok(())
}

#[tokio::test]
async fn test_required_rejects_null_and_blank() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;
    let required = ["the field 'nickname' is required".to_string()];

    for nickname in [None, Some(String::new()), Some("   ".to_string()), Some("\t\n".to_string())] {
        let signup = Signup { nickname: nickname.clone(), code: Some("5".to_string()), ..Default::default() };
        let errors = signup.errors(action.as_ref()).await?;
        assert_eq!(errors.get("nickname"), Some(&required[..]), "{nickname:?}");
    }

    let signup = Signup { nickname: Some(" ana ".to_string()), code: Some("5".to_string()), ..Default::default() };
    assert!(signup.is_valid(action.as_ref()).await?);

    Ok(())
}

#[tokio::test]
async fn test_number_range_rejects_non_numeric() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;
    let numeric = ["the field 'code' must be numeric".to_string()];

    for code in [None, Some("abc".to_string()), Some(String::new()), Some("1O".to_string())] {
        let signup = Signup { nickname: Some("Ana".to_string()), code: code.clone(), ..Default::default() };
        let errors = signup.errors(action.as_ref()).await?;
        assert_eq!(errors.get("code"), Some(&numeric[..]), "{code:?}");
    }

    // numeric text inside the range passes
    let signup = Signup { nickname: Some("Ana".to_string()), code: Some(" 7 ".to_string()), ..Default::default() };
    assert!(signup.is_valid(action.as_ref()).await?);

    Ok(())
}
