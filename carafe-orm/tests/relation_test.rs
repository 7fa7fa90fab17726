use std::sync::Arc;

use carafe_orm::{Action, ActionFactory, Database, Entity, Error, Fields, Model, Value};

#[derive(Debug, Default, Clone, Entity)]
#[orm(table = "teams", has_many(Player))]
struct Team {
    id: Option<i64>,
    #[orm(column)]
    name: String,
}

#[derive(Debug, Default, Clone, Entity)]
#[orm(has_one(Profile), has_and_belongs_to_many(Role))]
struct Player {
    id: Option<i64>,
    #[orm(column)]
    name: String,
    #[orm(column, belongs_to(Team))]
    team_id: Option<i64>,
}

#[derive(Debug, Default, Clone, Entity)]
#[orm(belongs_to(Player))]
struct Profile {
    id: Option<i64>,
    #[orm(column)]
    player_id: Option<i64>,
    #[orm(column)]
    bio: String,
}

#[derive(Debug, Default, Clone, Entity)]
#[orm(has_and_belongs_to_many(Player, pivot = "player_role", foreign_pivot_key = "role_id", related_pivot_key = "player_id"))]
struct Role {
    id: Option<i64>,
    #[orm(column)]
    name: String,
}

async fn setup() -> Result<Arc<dyn Action>, Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let db = Database::builder().max_connections(1).connect("sqlite::memory:").await?;
    let action = ActionFactory::for_database(db);

    for sql in [
        "CREATE TABLE teams (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
        "CREATE TABLE players (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, team_id INTEGER)",
        "CREATE TABLE profiles (id INTEGER PRIMARY KEY AUTOINCREMENT, player_id INTEGER, bio TEXT)",
        "CREATE TABLE roles (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)",
        "CREATE TABLE player_role (player_id INTEGER NOT NULL, role_id INTEGER NOT NULL, since TEXT)",
    ] {
        action.execute_sql(sql).await?;
    }

    Ok(action)
}

async fn seed(action: &dyn Action) -> Result<(Team, Player, Player), Error> {
    let mut team = Team { name: "Falcons".to_string(), ..Default::default() };
    team.save(action).await?;

    let mut ana = Player { name: "Ana".to_string(), team_id: team.id, ..Default::default() };
    ana.save(action).await?;
    let mut bob = Player { name: "Bob".to_string(), team_id: team.id, ..Default::default() };
    bob.save(action).await?;

    for name in ["captain", "keeper", "striker"] {
        Role { name: name.to_string(), ..Default::default() }.save(action).await?;
    }

    Ok((team, ana, bob))
}

fn role_names(roles: &[Role]) -> Vec<String> {
    let mut names: Vec<String> = roles.iter().map(|r| r.name.clone()).collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_belongs_to_and_has_many() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;
    let (team, ana, _) = seed(action.as_ref()).await?;

    let owner: Option<Team> = ana.get_owner(action.as_ref()).await?;
    assert_eq!(owner.map(|t| t.name), Some("Falcons".to_string()));

    let players: Vec<Player> = team.has_many(action.as_ref()).await?;
    assert_eq!(players.len(), 2);

    // Null keys short-circuit without a query
    let free_agent = Player { name: "Zed".to_string(), ..Default::default() };
    assert!(free_agent.get_owner::<Team>(action.as_ref()).await?.is_none());
    assert!(Team::default().has_many::<Player>(action.as_ref()).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_has_one_and_owner_with_default_keys() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;
    let (_, ana, bob) = seed(action.as_ref()).await?;

    let mut profile = Profile { player_id: ana.id, bio: "Left wing".to_string(), ..Default::default() };
    profile.save(action.as_ref()).await?;

    // has_one(Profile) on Player reads profiles.player_id = players.id
    let found: Option<Profile> = ana.has_one(action.as_ref()).await?;
    assert_eq!(found.map(|p| p.bio), Some("Left wing".to_string()));
    assert!(bob.has_one::<Profile>(action.as_ref()).await?.is_none());

    // belongs_to(Player) declared on the struct reads profiles.player_id -> players.id
    let owner: Option<Player> = profile.get_owner(action.as_ref()).await?;
    assert_eq!(owner.map(|p| p.name), Some("Ana".to_string()));

    profile.player_id = None;
    assert!(profile.get_owner::<Player>(action.as_ref()).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_missing_relation_marker() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;
    let (team, _, _) = seed(action.as_ref()).await?;

    let result = team.has_one::<Profile>(action.as_ref()).await;
    assert!(matches!(result, Err(Error::Relationship(_))));

    Ok(())
}

#[tokio::test]
async fn test_attach_is_deduplicated() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;
    let (_, ana, _) = seed(action.as_ref()).await?;

    let extra = Fields::from([("since", "2024-01-01")]);
    ana.attach::<Role>(action.as_ref(), vec![Value::Int(1), Value::Int(2)], extra.clone()).await?;
    ana.attach::<Role>(action.as_ref(), vec![Value::Int(2)], extra).await?;

    assert_eq!(action.count("player_role", &Fields::new()).await?, 2);
    assert_eq!(action.count("player_role", &Fields::from([("since", "2024-01-01")])).await?, 2);
    assert!(!action.connection().in_transaction().await);

    let roles: Vec<Role> = ana.has_and_belongs_to_many(action.as_ref()).await?;
    assert_eq!(role_names(&roles), vec!["captain", "keeper"]);

    Ok(())
}

#[tokio::test]
async fn test_many_to_many_from_both_sides() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;
    let (_, ana, bob) = seed(action.as_ref()).await?;

    ana.attach::<Role>(action.as_ref(), vec![Value::Int(1)], Fields::new()).await?;
    bob.attach::<Role>(action.as_ref(), vec![Value::Int(1), Value::Int(3)], Fields::new()).await?;

    let captain = Role::find(action.as_ref(), 1).await?.ok_or("role not found")?;
    let mut players: Vec<String> = captain
        .has_and_belongs_to_many::<Player>(action.as_ref())
        .await?
        .into_iter()
        .map(|p| p.name)
        .collect();
    players.sort();
    assert_eq!(players, vec!["Ana", "Bob"]);

    Ok(())
}

#[tokio::test]
async fn test_detach_and_sync() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;
    let (_, ana, _) = seed(action.as_ref()).await?;

    ana.attach::<Role>(action.as_ref(), vec![Value::Int(1), Value::Int(2)], Fields::new()).await?;

    assert!(ana.sync::<Role>(action.as_ref(), vec![Value::Int(2), Value::Int(3)]).await?);
    let roles: Vec<Role> = ana.has_and_belongs_to_many(action.as_ref()).await?;
    assert_eq!(role_names(&roles), vec!["keeper", "striker"]);

    assert_eq!(ana.detach::<Role>(action.as_ref(), vec![Value::Int(3)]).await?, 1);
    assert_eq!(ana.detach::<Role>(action.as_ref(), vec![Value::Int(3)]).await?, 0);
    assert_eq!(ana.detach::<Role>(action.as_ref(), Vec::new()).await?, 1);
    assert!(ana.has_and_belongs_to_many::<Role>(action.as_ref()).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_detach_all_reports_deleted_rows() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;
    let (_, ana, bob) = seed(action.as_ref()).await?;

    ana.attach::<Role>(action.as_ref(), vec![Value::Int(1), Value::Int(2)], Fields::new()).await?;
    bob.attach::<Role>(action.as_ref(), vec![Value::Int(1)], Fields::new()).await?;
    // a duplicate link written outside attach still counts as a removed row
    action.execute_sql("INSERT INTO player_role (player_id, role_id) VALUES (1, 2)").await?;

    assert_eq!(ana.detach::<Role>(action.as_ref(), Vec::new()).await?, 3);
    assert_eq!(ana.detach::<Role>(action.as_ref(), Vec::new()).await?, 0);
    assert_eq!(action.count("player_role", &Fields::new()).await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_attach_joins_an_open_transaction() -> Result<(), Box<dyn std::error::Error>> {
    let action = setup().await?;
    let (_, ana, _) = seed(action.as_ref()).await?;

    action.begin_transaction().await?;
    ana.attach::<Role>(action.as_ref(), vec![Value::Int(1)], Fields::new()).await?;
    assert!(action.connection().in_transaction().await);
    action.roll_back().await?;

    assert_eq!(action.count("player_role", &Fields::new()).await?, 0);

    let unsaved = Player::default();
    let result = unsaved.attach::<Role>(action.as_ref(), vec![Value::Int(1)], Fields::new()).await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));

    Ok(())
}
