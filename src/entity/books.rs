use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "books")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub price: Decimal,
    pub description: Option<String>,
    pub cover_image: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::book_categories::Entity")]
    BookCategories,
    #[sea_orm(has_many = "super::cart_items::Entity")]
    CartItems,
    #[sea_orm(has_many = "super::order_items::Entity")]
    OrderItems,
}

impl Related<super::book_categories::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BookCategories.def()
    }
}

impl Related<super::cart_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl Related<super::order_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::categories::Entity> for Entity {
    fn to() -> RelationDef {
        super::book_categories::Relation::Categories.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::book_categories::Relation::Books.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
