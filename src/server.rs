// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 监听循环
//!
//! 持续接收新连接，每个连接交给一个 Tokio 任务处理。同时运行的连接数受信号量限制，
//! 超出的连接在任务中排队等待空闲名额。

use std::sync::Arc;

use log::{debug, error, info};
use tokio::{
    net::TcpListener,
    sync::{Notify, Semaphore},
};

use crate::{exception::Exception, handler::ProxyHandler};

/// 运行监听循环，直到收到停机通知或监听 Socket 出错
pub async fn serve(
    listener: TcpListener,
    handler: Arc<ProxyHandler>,
    pool: Arc<Semaphore>,
    shutdown: Arc<Notify>,
) -> Result<(), Exception> {
    let mut id: u128 = 0;
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.notified() => {
                info!("主循环接收到停机指令，正在退出...");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("监听Socket出错：{}", e);
                    return Err(e.into());
                }
            },
        };
        debug!("[ID{}]新的连接：{}", id, peer);

        let handler = Arc::clone(&handler);
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            // 信号量被关闭时放弃尚未开始处理的连接
            let _permit = match pool.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            handler.dispatch(stream, peer, id).await;
        });
        id += 1;
    }
}
