use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "admin_users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Stored lowercased
    #[sea_orm(unique)]
    pub email: String,
    pub name: String,
    pub role: String,
    /// bcrypt (`$2...`) or legacy hex SHA-256
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Base32 TOTP secret, encrypted at rest when a key is configured
    #[serde(skip_serializing)]
    pub mfa_secret: Option<String>,
    pub mfa_enabled: bool,
    /// Hex SHA-256 digests of unused backup codes
    #[sea_orm(column_type = "Json")]
    #[serde(skip_serializing)]
    pub mfa_backup_codes: Json,
    #[serde(skip_serializing)]
    pub mfa_backup_salt: Option<String>,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::admin_refresh_token::Entity")]
    RefreshTokens,
}

impl Related<super::admin_refresh_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RefreshTokens.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn backup_code_hashes(&self) -> Vec<String> {
        serde_json::from_value(self.mfa_backup_codes.clone()).unwrap_or_default()
    }
}
