//! Concurrency and atomicity contract of the transaction manager.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use proptest::prelude::*;
use tokio::sync::{oneshot, Barrier, Notify};

use mxsync_store::{MemoryStore, Repository, StoreError, TransactionManager};

const VALUES: Repository<String, u32> = Repository::new("values");

fn setup() -> (Arc<MemoryStore>, TransactionManager) {
    let store = Arc::new(MemoryStore::new());
    let manager = TransactionManager::new(store.clone());
    (store, manager)
}

async fn read(manager: &TransactionManager, key: &str) -> Option<u32> {
    let key = key.to_string();
    manager
        .read_transaction(|tx| async move { VALUES.get(&tx, &key).await })
        .await
        .unwrap()
}

async fn seed(manager: &TransactionManager, key: &str, value: u32) {
    let key = key.to_string();
    manager
        .write_transaction(|tx| async move { VALUES.save(&tx, &key, &value).await })
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_do_not_block_each_other() {
    const WRITERS: usize = 8;
    let (store, manager) = setup();
    let barrier = Arc::new(Barrier::new(WRITERS));

    let writers = (0..WRITERS).map(|i| {
        let manager = manager.clone();
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            manager
                .write_transaction(|tx| async move {
                    VALUES.save(&tx, &format!("w{}", i), &(i as u32)).await?;
                    // Every writer must be inside its transaction before any commits.
                    barrier.wait().await;
                    Ok::<_, StoreError>(())
                })
                .await
        })
    });

    let results = tokio::time::timeout(Duration::from_secs(5), join_all(writers))
        .await
        .expect("writers serialized against each other");

    for result in results {
        result.unwrap().unwrap();
    }
    assert_eq!(store.len(), WRITERS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reader_completes_while_writer_is_parked() {
    let (_store, manager) = setup();
    seed(&manager, "k", 1).await;

    let (started_tx, started_rx) = oneshot::channel();
    let release = Arc::new(Notify::new());

    let writer = {
        let manager = manager.clone();
        let release = Arc::clone(&release);
        tokio::spawn(async move {
            manager
                .write_transaction(|tx| async move {
                    VALUES.save(&tx, &"k".to_string(), &2).await?;
                    let _ = started_tx.send(());
                    release.notified().await;
                    Ok::<_, StoreError>(())
                })
                .await
        })
    };

    started_rx.await.unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(5), read(&manager, "k"))
        .await
        .expect("reader blocked by writer");
    assert_eq!(seen, Some(1), "uncommitted write leaked to a reader");
    assert!(!writer.is_finished());

    release.notify_one();
    writer.await.unwrap().unwrap();
    assert_eq!(read(&manager, "k").await, Some(2));
}

#[tokio::test]
async fn failed_transaction_rolls_back_nested_writes() {
    let (_store, manager) = setup();
    seed(&manager, "k", 1).await;

    let result: Result<(), StoreError> = manager
        .write_transaction(|tx| async move {
            VALUES.save(&tx, &"k".to_string(), &99).await?;
            tx.write_transaction(|tx| async move {
                VALUES.save(&tx, &"other".to_string(), &7).await
            })
            .await?;
            Err(StoreError::Backend("subscriber failed".into()))
        })
        .await;

    assert!(matches!(result, Err(StoreError::Backend(_))));
    assert_eq!(read(&manager, "k").await, Some(1));
    assert_eq!(read(&manager, "other").await, None);
}

#[tokio::test]
async fn custom_error_type_is_returned_unchanged() {
    #[derive(Debug, PartialEq)]
    enum AppError {
        Store,
        Rejected(&'static str),
    }

    impl From<StoreError> for AppError {
        fn from(_: StoreError) -> Self {
            AppError::Store
        }
    }

    let (store, manager) = setup();
    let result: Result<(), AppError> = manager
        .write_transaction(|tx| async move {
            VALUES.save(&tx, &"k".to_string(), &5).await?;
            Err(AppError::Rejected("nope"))
        })
        .await;

    assert_eq!(result, Err(AppError::Rejected("nope")));
    assert!(store.is_empty());
}

#[tokio::test]
async fn cancelled_transaction_leaves_no_writes() {
    let (store, manager) = setup();
    let (written_tx, written_rx) = oneshot::channel();

    let task = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .write_transaction(|tx| async move {
                    VALUES.save(&tx, &"k".to_string(), &1).await?;
                    let _ = written_tx.send(());
                    futures::future::pending::<()>().await;
                    Ok::<_, StoreError>(())
                })
                .await
        })
    };

    written_rx.await.unwrap();
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(read(&manager, "k").await, None);
    assert!(store.is_empty());
}

#[tokio::test]
async fn panicking_body_leaves_no_writes() {
    let (store, manager) = setup();

    let task = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .write_transaction(|tx| async move {
                    VALUES.save(&tx, &"k".to_string(), &1).await?;
                    if tx.pending_writes() > 0 {
                        panic!("subscriber bug");
                    }
                    Ok::<_, StoreError>(())
                })
                .await
        })
    };

    assert!(task.await.unwrap_err().is_panic());
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn body_can_fan_out_sub_work() {
    let (store, manager) = setup();

    manager
        .write_transaction(|tx| async move {
            let handles = (0..32u32).map(|i| {
                let tx = tx.clone();
                tokio::spawn(async move { VALUES.save(&tx, &format!("f{:02}", i), &i).await })
            });
            for result in join_all(handles).await {
                result.expect("sub-task panicked")?;
            }
            Ok::<_, StoreError>(())
        })
        .await
        .unwrap();

    assert_eq!(store.len(), 32);
    assert_eq!(store.commit_count(), 1);
    assert_eq!(read(&manager, "f31").await, Some(31));
}

#[derive(Debug, Clone)]
enum Op {
    Put(u8, u32),
    Delete(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8, any::<u32>()).prop_map(|(k, v)| Op::Put(k, v)),
        (0u8..8).prop_map(Op::Delete),
    ]
}

async fn apply_ops(tx: &mxsync_store::Transaction, ops: &[Op]) -> Result<(), StoreError> {
    for op in ops {
        match op {
            Op::Put(k, v) => VALUES.save(tx, &format!("p{}", k), v).await?,
            Op::Delete(k) => VALUES.delete(tx, &format!("p{}", k)).await?,
        }
    }
    Ok(())
}

async fn snapshot(manager: &TransactionManager) -> Vec<(String, u32)> {
    manager
        .read_transaction(|tx| async move { VALUES.get_all(&tx).await })
        .await
        .unwrap()
}

proptest! {
    #[test]
    fn nesting_is_transparent(ops in prop::collection::vec(op(), 0..24), split in 0usize..24) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (flat, nested) = rt.block_on(async {
            let (_a, flat_manager) = setup();
            let (_b, nested_manager) = setup();
            let split = split.min(ops.len());

            let flat_ops = ops.clone();
            flat_manager
                .write_transaction(|tx| async move { apply_ops(&tx, &flat_ops).await })
                .await
                .unwrap();

            let (head, tail) = (ops[..split].to_vec(), ops[split..].to_vec());
            nested_manager
                .write_transaction(|tx| async move {
                    apply_ops(&tx, &head).await?;
                    tx.write_transaction(|inner| async move { apply_ops(&inner, &tail).await })
                        .await
                })
                .await
                .unwrap();

            (snapshot(&flat_manager).await, snapshot(&nested_manager).await)
        });

        prop_assert_eq!(flat, nested);
    }
}
