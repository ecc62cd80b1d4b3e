use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "channel_directories")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub rowid: i64,
    #[sea_orm(unique)]
    pub channel_id: i64,
    pub directory: String,
    pub channel_type: String,
    pub created_at: i64,
}

impl ActiveModelBehavior for ActiveModel {}
