use clap::{Parser as ClapParser, ValueEnum};
use log::LevelFilter;

use herald::{Expr, FATAL_EXIT_CODE, HeapCreateInfo, VM, VMCreateInfo, VMProxy};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Demo {
    Recursion,
    Channel,
    Actor,
    All,
}

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Size of the heap arena in words
    #[arg(long, default_value_t = HeapCreateInfo::default().words)]
    heap_words: usize,

    /// Which demo program to run
    #[arg(long, value_enum, default_value_t = Demo::All)]
    demo: Demo,

    /// Recursion depth of the recursion demo
    #[arg(long, default_value_t = 1000)]
    depth: i64,

    /// Force a collection at the end and print its statistics
    #[arg(long)]
    gc_stats: bool,

    /// More logging, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    match verbose {
        0 => {}
        1 => {
            builder.filter_level(LevelFilter::Info);
        }
        2 => {
            builder.filter_level(LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(LevelFilter::Trace);
        }
    }
    builder.init();
}

/// `sum: n` = `(n < 1) ifTrue: [0] ifFalse: [n + (sum: n - 1)]`
fn recursion(proxy: &VMProxy, depth: i64) {
    let lobby = proxy.specials().lobby;
    let body = Expr::send(
        Expr::send(Expr::var("n"), "<", [Expr::Integer(1)]),
        "ifTrue:ifFalse:",
        [
            Expr::block(&[], [Expr::Integer(0)]),
            Expr::block(
                &[],
                [Expr::send(
                    Expr::var("n"),
                    "+",
                    [Expr::implicit(
                        "sum:",
                        [Expr::send(Expr::var("n"), "-", [Expr::Integer(1)])],
                    )],
                )],
            ),
        ],
    );
    let sum = proxy.method(&["n"], &[body], lobby);
    proxy.add_slot(lobby, "sum:", sum);

    let result = proxy.evaluate_top(&Expr::implicit("sum:", [Expr::Integer(depth)]));
    println!("sum: {depth} = {}", proxy.describe(proxy.wait(result)));
}

fn channel(proxy: &VMProxy) {
    let env = proxy.specials().root_environment;
    let target = proxy.integer(100);
    let channel = proxy.new_channel(target);
    let promises: Vec<_> = (1..=4)
        .map(|n| {
            let n = proxy.integer(n);
            proxy.async_call(env, channel, "+", &[n])
        })
        .collect();
    for (n, promise) in (1..=4).zip(promises) {
        println!("channel 100 + {n} = {}", proxy.describe(proxy.wait(promise)));
    }
}

fn actor(proxy: &VMProxy) {
    let env = proxy.specials().root_environment;
    let target = proxy.integer(10);
    let actor = proxy.new_actor(target);
    let promises: Vec<_> = (1..=3)
        .map(|n| {
            let n = proxy.integer(n);
            proxy.call(env, actor, "*", &[n])
        })
        .collect();
    println!("actor accepted {} messages", promises.len());
    for (n, promise) in (1..=3).zip(promises) {
        println!("actor 10 * {n} = {}", proxy.describe(proxy.wait(promise)));
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let heap = HeapCreateInfo {
        words: cli.heap_words,
    };
    let vm = match VM::new(VMCreateInfo { heap }) {
        Ok(vm) => vm,
        Err(err) => {
            eprintln!("failed to create vm: {err}");
            std::process::exit(FATAL_EXIT_CODE);
        }
    };
    let proxy = vm.proxy();

    if matches!(cli.demo, Demo::Recursion | Demo::All) {
        recursion(&proxy, cli.depth);
    }
    if matches!(cli.demo, Demo::Channel | Demo::All) {
        channel(&proxy);
    }
    if matches!(cli.demo, Demo::Actor | Demo::All) {
        actor(&proxy);
    }

    if cli.gc_stats {
        let stats = proxy.heap.collect();
        println!(
            "gc #{}: {} live blocks ({} words), {} free blocks ({} words)",
            stats.cycle, stats.live_blocks, stats.live_words, stats.free_blocks, stats.free_words
        );
    }
}
