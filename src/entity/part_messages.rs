use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "part_messages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub rowid: i64,
    #[sea_orm(unique)]
    pub part_id: String,
    pub message_id: i64,
    pub thread_id: i64,
    pub created_at: i64,
}

impl ActiveModelBehavior for ActiveModel {}
