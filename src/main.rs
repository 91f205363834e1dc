// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 缓存转发代理
//!
//! 基于 Tokio 运行时的多线程 HTTP 转发代理。核心功能包括：
//! - 解析客户端请求并转发给上游服务器
//! - 按配置屏蔽用户与网址、重定向访问地址
//! - 以磁盘文件缓存 GET 响应，并通过条件请求重新验证
//! - 后台管理控制台（CLI 指令交互）

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    process,
    sync::Arc,
};

use log::{error, info};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
    runtime::Builder,
    sync::{Notify, Semaphore},
};

use webproxy::{server, Config, Exception, ProxyHandler};

fn main() {
    // 1. 初始化日志系统：通过外部 YAML 配置级别与输出目的地
    if let Err(e) = log4rs::init_file("config/log4rs.yaml", Default::default()) {
        eprintln!("无法初始化日志系统：{}", e);
        process::exit(1);
    }

    // 2. 环境配置加载：从 TOML 文件读取运行参数
    let config = match Config::from_toml("config/development.toml") {
        Ok(config) => config,
        Err(e) => {
            error!("无法载入配置文件：{}", e);
            process::exit(1);
        }
    };
    info!("配置文件已载入");
    info!("缓存目录：{}", config.cache_dir());

    // 3. 根据配置文件分配工作线程数
    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建Tokio运行时：{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config)) {
        error!("服务端异常退出：{}", e);
        process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Exception> {
    // 支持全地址监听 (0.0.0.0) 或本地回环监听 (127.0.0.1)
    let port = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    let socket = SocketAddrV4::new(address, port);
    let listener = match TcpListener::bind(socket).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            return Err(e.into());
        }
    };
    info!("服务端将在{}上监听Socket连接", socket);

    let max_connections = config.max_connections();
    let handler = Arc::new(ProxyHandler::new(&config));
    let pool = Arc::new(Semaphore::new(max_connections));
    let shutdown = Arc::new(Notify::new());

    // 启动交互式管理控制台任务，不阻塞监听循环
    tokio::spawn(console(
        Arc::clone(&shutdown),
        Arc::clone(&pool),
        Arc::clone(&handler),
        max_connections,
    ));

    server::serve(listener, handler, pool, shutdown).await
}

async fn console(
    shutdown: Arc<Notify>,
    pool: Arc<Semaphore>,
    handler: Arc<ProxyHandler>,
    max_connections: usize,
) {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut input = String::new();
    loop {
        input.clear();
        match reader.read_line(&mut input).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        match input.trim() {
            "stop" => {
                shutdown.notify_one();
                println!("停机指令已激活，服务器将停止接受新连接...");
                break;
            }
            "help" => {
                println!("== Webproxy Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前代理运行状态");
                println!("help   - 显示此帮助信息");
                println!("===================");
            }
            "status" => {
                let active = max_connections - pool.available_permits();
                println!("== Webproxy 状态 ===");
                println!("当前活跃连接数: {}/{}", active, max_connections);
                println!("缓存目录: {}", handler.cache().dir().display());
                println!("缓存索引条目数: {}", handler.cache().indexed());
                println!("===================");
            }
            "" => {}
            cmd => println!("无效的命令：{}", cmd),
        }
    }
}
