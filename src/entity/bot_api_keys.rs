use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "bot_api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub rowid: i64,
    #[sea_orm(unique)]
    pub app_id: String,
    pub primary_key: String,
    pub fallback_key: Option<String>,
    pub created_at: i64,
}

impl ActiveModelBehavior for ActiveModel {}
