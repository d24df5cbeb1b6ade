use crate::command::{Command, CommandType, NotificationEvent, TimelineDescriptor, TimelineKind};
use crate::db::*;
use crate::types::{AccountName, CommandId, QueueType};
use tempfile::NamedTempFile;

fn alice() -> AccountName {
    AccountName::new("alice@example.social")
}

fn sample_commands() -> Vec<(QueueType, Command)> {
    let timeline = Command::get_timeline(alice(), TimelineKind::Home);

    let mut retrying = Command::new(
        CommandType::SearchActors,
        alice(),
        TimelineDescriptor {
            kind: TimelineKind::Search,
            actor_id: 0,
            origin: Some("example.social".into()),
            search_query: Some("rustaceans".into()),
        },
    );
    retrying.result.prepare_for_launch(1_000);
    retrying.result.io_errors = 1;
    retrying.result.message = "connection reset".into();
    retrying.result.delay_till(61_000);
    retrying.result.on_notification(NotificationEvent::Mention, 2);

    let avatar = Command::get_avatar(alice(), 42).in_foreground(true);

    vec![
        (QueueType::Current, timeline),
        (QueueType::Retry, retrying),
        (QueueType::Downloads, avatar),
    ]
}

#[tokio::test]
async fn test_replace_and_load_round_trip() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let commands = sample_commands();

    db.replace_all_commands(&commands).await.unwrap();
    let loaded = db.load_commands().await.unwrap();

    assert_eq!(loaded.len(), commands.len());
    for (queue, original) in &commands {
        let (loaded_queue, loaded_command) = loaded
            .iter()
            .find(|(_, c)| c.id == original.id)
            .expect("command missing after reload");
        assert_eq!(loaded_queue, queue);
        assert_eq!(loaded_command, original);
        assert_eq!(loaded_command.created_at, original.created_at);
        assert_eq!(loaded_command.in_foreground, original.in_foreground);
        assert_eq!(loaded_command.result, original.result);
    }

    db.close().await;
}

#[tokio::test]
async fn test_replace_all_drops_previous_rows() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.replace_all_commands(&sample_commands()).await.unwrap();
    let survivor = Command::get_timeline(alice(), TimelineKind::Notifications);
    db.replace_all_commands(&[(QueueType::Error, survivor.clone())])
        .await
        .unwrap();

    let loaded = db.load_commands().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].0, QueueType::Error);
    assert_eq!(loaded[0].1.id, survivor.id);

    let counts = db.count_commands_by_queue().await.unwrap();
    assert_eq!(counts, vec![(QueueType::Error.to_i32(), 1)]);

    db.close().await;
}

#[tokio::test]
async fn test_corrupt_rows_are_skipped() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    db.replace_all_commands(&sample_commands()).await.unwrap();

    sqlx::query("UPDATE commands SET command_type = 'teleport' WHERE queue_type = ?")
        .bind(QueueType::Current.to_i32())
        .execute(db.pool())
        .await
        .unwrap();

    let loaded = db.load_commands().await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert!(loaded.iter().all(|(q, _)| *q != QueueType::Current));

    db.close().await;
}

#[test]
fn test_row_rejects_unknown_queue() {
    let command = Command::delete_command(CommandId(5));
    let mut row = CommandRow::from_command(QueueType::Current, &command).unwrap();
    row.queue_type = 99;

    match row.into_command() {
        Err(crate::Error::Database(crate::error::DatabaseError::CorruptRow(message))) => {
            assert!(message.contains("unknown queue type 99"));
        }
        other => panic!("expected corrupt row error, got {other:?}"),
    }
}
