use uuid::Uuid;

/// Sample account row written by the PostgreSQL tests
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub balance: i64,
}

impl User {
    pub fn new(username: &str, balance: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            balance,
        }
    }
}
