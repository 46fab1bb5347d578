//! Table and index creation.
//!
//! Tables are derived from the entities; the uniqueness rules the engine relies on
//! (one vote per voter per poll, one option per normalized text per poll) live here
//! as unique indexes so the store enforces them on write.

use crate::orm::{poll_options, polls, votes};
use sea_orm::sea_query::{Index, IndexCreateStatement};
use sea_orm::{ConnectionTrait, DbErr, EntityTrait, Schema};

pub const VOTES_POLL_VOTER_UNIQUE: &str = "votes_poll_id_voter_id_key";
pub const OPTIONS_POLL_TEXT_UNIQUE: &str = "poll_options_poll_id_normalized_text_key";

/// Creates every table and index if missing. Safe to run on each startup.
pub async fn create_tables<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    // Parents before children so foreign keys resolve.
    create_table(db, &schema, polls::Entity).await?;
    create_table(db, &schema, poll_options::Entity).await?;
    create_table(db, &schema, votes::Entity).await?;

    for index in indexes() {
        db.execute(backend.build(&index)).await?;
    }

    log::info!("Database schema ready");
    Ok(())
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let stmt = schema
        .create_table_from_entity(entity)
        .if_not_exists()
        .to_owned();
    db.execute(db.get_database_backend().build(&stmt)).await?;
    Ok(())
}

fn indexes() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .if_not_exists()
            .name(VOTES_POLL_VOTER_UNIQUE)
            .table(votes::Entity)
            .col(votes::Column::PollId)
            .col(votes::Column::VoterId)
            .unique()
            .to_owned(),
        Index::create()
            .if_not_exists()
            .name(OPTIONS_POLL_TEXT_UNIQUE)
            .table(poll_options::Entity)
            .col(poll_options::Column::PollId)
            .col(poll_options::Column::NormalizedText)
            .unique()
            .to_owned(),
        Index::create()
            .if_not_exists()
            .name("polls_owner_id_idx")
            .table(polls::Entity)
            .col(polls::Column::OwnerId)
            .to_owned(),
        Index::create()
            .if_not_exists()
            .name("votes_option_id_idx")
            .table(votes::Entity)
            .col(votes::Column::OptionId)
            .to_owned(),
    ]
}
