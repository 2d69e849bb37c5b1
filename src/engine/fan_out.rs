// ==========================================
// 关税归类与税费计算引擎 - 有界并发扇出
// ==========================================
// 约束: 同时运行的任务数 ≤ limit；结果按输入顺序写回索引槽位
// ==========================================

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tokio::sync::Semaphore;

/// 以至多 `limit` 个并发执行 `f(item)`，结果按输入顺序返回
///
/// # 说明
/// - limit 为 0 时按 1 处理
/// - 单个任务的失败由 `R` 自行表达（例如 `Result`），不影响其他任务
pub async fn bounded_fan_out<T, R, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let semaphore = Semaphore::new(limit.max(1));
    let mut slots: Vec<Option<R>> = Vec::with_capacity(items.len());
    slots.resize_with(items.len(), || None);

    let mut pending: FuturesUnordered<_> = items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            let semaphore = &semaphore;
            let task = f(item);
            async move {
                // 信号量从不关闭，acquire 不会失败
                let _permit = semaphore.acquire().await.ok();
                (idx, task.await)
            }
        })
        .collect();

    while let Some((idx, result)) = pending.next().await {
        slots[idx] = Some(result);
    }

    slots.into_iter().flatten().collect()
}
