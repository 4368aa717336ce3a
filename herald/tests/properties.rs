use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use herald::{
    Exception, ExceptionKind, Expr, Flow, HeapCreateInfo, ParseOutcome, PrimitiveContext,
    PrimitiveFunction, Tag, VM, VMCreateInfo, VMProxy, Value,
};

fn vm(words: usize) -> VM {
    VM::new(VMCreateInfo {
        heap: HeapCreateInfo { words },
    })
    .unwrap()
}

/// `n after: ms` answers `n` once `ms` milliseconds have passed.
fn after(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let ms = ctx.integer_arg(0)?;
    thread::sleep(Duration::from_millis(ms as u64));
    Ok(Flow::Return(ctx.receiver()))
}

fn install(
    proxy: &VMProxy,
    holder: Value,
    selector: &str,
    name: &'static str,
    ptr: PrimitiveFunction,
) {
    let primitive = proxy.register_primitive(name, ptr);
    proxy.add_slot(holder, selector, primitive);
}

#[test]
fn arguments_land_in_source_order() {
    let vm = vm(1 << 18);
    let proxy = vm.proxy();
    let lobby = proxy.specials().lobby;
    install(&proxy, proxy.specials().integer, "after:", "test-after", after);

    // a:b:c: = a * 100 + (b * 10) + c
    let body = Expr::send(
        Expr::send(
            Expr::send(Expr::var("a"), "*", [Expr::Integer(100)]),
            "+",
            [Expr::send(Expr::var("b"), "*", [Expr::Integer(10)])],
        ),
        "+",
        [Expr::var("c")],
    );
    let method = proxy.method(&["a", "b", "c"], &[body], lobby);
    proxy.add_slot(lobby, "a:b:c:", method);

    // The first argument finishes last.
    let expr = Expr::implicit(
        "a:b:c:",
        [
            Expr::spawn(Expr::send(Expr::Integer(1), "after:", [Expr::Integer(40)])),
            Expr::spawn(Expr::send(Expr::Integer(2), "after:", [Expr::Integer(10)])),
            Expr::Integer(3),
        ],
    );
    let result = proxy.evaluate_top(&expr);
    assert_eq!(proxy.integer_value(result), Some(123));
}

#[test]
fn racing_fulfillments_keep_the_first() {
    let vm = vm(1 << 16);
    let proxy = vm.proxy();
    let promise = proxy.new_promise();
    proxy.heap.pin(promise);

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let vm = vm.clone();
            thread::spawn(move || {
                let proxy = vm.proxy();
                let value = proxy.integer(n);
                proxy.fulfill(promise, value).then_some(value)
            })
        })
        .collect();
    let winners: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(proxy.wait(promise), winners[0]);
    assert_eq!(proxy.wait(promise), winners[0]);
}

#[test]
fn wait_is_identity_on_plain_values() {
    let vm = vm(1 << 16);
    let proxy = vm.proxy();
    let s = proxy.string("plain");
    assert_eq!(proxy.wait(s), s);
    let promise = proxy.new_promise();
    proxy.fulfill(promise, s);
    assert_eq!(proxy.wait(promise), s);
}

#[test]
fn free_and_live_words_cover_the_arena() {
    let vm = vm(1 << 16);
    let proxy = vm.proxy();
    let mut kept = Vec::new();
    for len in 0..200 {
        let block = proxy.heap.allocate(len % 13, Tag::Vector);
        assert!(proxy.heap.len(block) >= len % 13);
        if len % 3 == 0 {
            kept.push(block);
        }
    }
    let worker = vm.proxy();
    for len in 0..100 {
        worker.heap.allocate(len % 7 + 1, Tag::Raw);
    }
    drop(worker);

    let stats = proxy.heap.collect();
    assert_eq!(
        stats.live_words + stats.free_words,
        proxy.heap.usable_words()
    );
    let census = proxy.heap.census();
    assert_eq!(census.live_words, stats.live_words);
    assert!(kept.iter().all(|block| proxy.heap.is_live(*block)));
}

#[test]
fn sheltered_objects_survive_collection() {
    let vm = vm(1 << 16);
    let proxy = vm.proxy();
    let text = proxy.string("survivor");
    let n = proxy.integer(77);
    let vector = proxy.vector(&[text, n]);
    proxy.heap.collect();
    proxy.heap.collect();
    assert!(proxy.heap.is_live(vector));
    assert_eq!(proxy.heap.elements(vector), vec![text, n]);
    assert_eq!(proxy.string_value(text).as_deref(), Some("survivor"));
    assert_eq!(proxy.integer_value(n), Some(77));
}

/// Non-atomic read, pause, write on the receiver's raw counter.
fn bump(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let heap = ctx.heap();
    let counter = heap.hidden(ctx.receiver());
    let before = heap.get_raw(counter, 0);
    thread::sleep(Duration::from_millis(2));
    heap.set_raw(counter, 0, before + 1);
    Ok(Flow::Return(ctx.vm().integer(before as i64)))
}

#[test]
fn channel_sends_serialize() {
    let vm = vm(1 << 18);
    let proxy = vm.proxy();
    let counter = proxy.heap.allocate_raw(&[0]);
    let target = proxy
        .heap
        .allocate_object(Tag::Object, proxy.specials().null, counter);
    install(&proxy, target, "bump", "test-bump", bump);
    let channel = proxy.new_channel(target);
    proxy.heap.pin(channel);

    let env = proxy.specials().root_environment;
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let vm = vm.clone();
            thread::spawn(move || {
                let proxy = vm.proxy();
                let result = proxy.call(env, channel, "bump", &[]);
                proxy.integer_value(result).unwrap()
            })
        })
        .collect();
    let mut seen: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..8).collect::<Vec<_>>());
    assert_eq!(proxy.heap.get_raw(counter, 0), 8);
}

#[test]
fn interning_is_by_content() {
    let vm = vm(1 << 16);
    let proxy = vm.proxy();
    let a = proxy.intern("selector:");
    let other = vm.proxy();
    let from_elsewhere = thread::spawn(move || other.intern("selector:"))
        .join()
        .unwrap();
    assert_eq!(a, from_elsewhere);
    assert_ne!(a, proxy.intern("selector"));
    assert_eq!(proxy.string_value(a).as_deref(), Some("selector:"));
}

#[test]
fn arity_mismatch_never_enters_the_body() {
    let vm = vm(1 << 17);
    let proxy = vm.proxy();
    let lobby = proxy.specials().lobby;
    let root = proxy.specials().root_environment;
    let marker = proxy.intern("entered");
    let body = Expr::send(
        Expr::var("lobby"),
        "at:put:",
        [Expr::Value(marker), Expr::Integer(1)],
    );
    let method = proxy.method(&["a", "b"], &[body], lobby);
    proxy.add_slot(lobby, "x:y:z:", method);

    let result = proxy.evaluate_top(&Expr::implicit(
        "x:y:z:",
        [Expr::Integer(1), Expr::Integer(2), Expr::Integer(3)],
    ));
    assert_eq!(proxy.exception_kind(result), Some(ExceptionKind::BadArity));
    let details = proxy.heap.hidden(result);
    assert_eq!(proxy.heap.get(details, 0), method);
    assert_eq!(proxy.integer_value(proxy.heap.get(details, 1)), Some(3));
    assert_eq!(proxy.lookup(lobby, "entered", root), None);
}

static GATE: AtomicBool = AtomicBool::new(false);

/// Appends the argument to the receiver's raw log once the gate opens.
fn record(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let value = ctx.integer_arg(0)?;
    while !GATE.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(1));
    }
    let heap = ctx.heap();
    let log = heap.hidden(ctx.receiver());
    let len = heap.get_raw(log, 0) as usize;
    thread::sleep(Duration::from_millis(1));
    heap.set_raw(log, len + 1, value as u64);
    heap.set_raw(log, 0, (len + 1) as u64);
    Ok(Flow::Return(ctx.receiver()))
}

#[test]
fn actor_processes_in_order_without_blocking_the_sender() {
    let vm = vm(1 << 18);
    let proxy = vm.proxy();
    let log = proxy.heap.allocate_raw(&[0, 0, 0, 0]);
    let target = proxy
        .heap
        .allocate_object(Tag::Object, proxy.specials().null, log);
    install(&proxy, target, "record:", "test-record", record);
    let actor = proxy.new_actor(target);
    let env = proxy.specials().root_environment;

    // The target is stuck behind the gate, yet every send returns.
    let promises: Vec<_> = (1..=3)
        .map(|n| {
            let n = proxy.integer(n);
            proxy.call(env, actor, "record:", &[n])
        })
        .collect();
    for promise in &promises {
        assert_eq!(proxy.heap.tag(*promise), Some(Tag::Promise));
        assert!(!proxy.is_fulfilled(*promise));
    }

    GATE.store(true, Ordering::Release);
    for promise in &promises {
        assert_eq!(proxy.wait(*promise), target);
    }
    let recorded: Vec<_> = (0..4).map(|i| proxy.heap.get_raw(log, i)).collect();
    assert_eq!(recorded, vec![3, 1, 2, 3]);
    assert_eq!(proxy.mailbox_len(actor), 0);
}

#[test]
fn deep_recursion_runs_on_the_heap() {
    let vm = vm(1 << 22);
    let proxy = vm.proxy();
    let lobby = proxy.specials().lobby;
    // count: n = (n < 1) ifTrue: [0] ifFalse: [1 + (count: n - 1)]
    let body = Expr::send(
        Expr::send(Expr::var("n"), "<", [Expr::Integer(1)]),
        "ifTrue:ifFalse:",
        [
            Expr::block(&[], [Expr::Integer(0)]),
            Expr::block(
                &[],
                [Expr::send(
                    Expr::Integer(1),
                    "+",
                    [Expr::implicit(
                        "count:",
                        [Expr::send(Expr::var("n"), "-", [Expr::Integer(1)])],
                    )],
                )],
            ),
        ],
    );
    let method = proxy.method(&["n"], &[body], lobby);
    proxy.add_slot(lobby, "count:", method);
    let result = proxy.evaluate_top(&Expr::implicit("count:", [Expr::Integer(5000)]));
    assert_eq!(proxy.integer_value(result), Some(5000));
}

#[test]
fn unknown_selectors_surface_as_no_method() {
    let vm = vm(1 << 16);
    let proxy = vm.proxy();
    let expr = Expr::send(Expr::Str("x".into()), "frobnicate:", [Expr::Integer(1)]);
    let result = proxy.evaluate_top(&expr);
    assert_eq!(proxy.exception_kind(result), Some(ExceptionKind::NoMethod));
    assert!(proxy.is_exception(result));
}

#[test]
fn handlers_cover_methods_called_beneath_them() {
    let vm = vm(1 << 17);
    let proxy = vm.proxy();
    let lobby = proxy.specials().lobby;
    let root = proxy.specials().root_environment;

    let failing = Expr::send(Expr::Integer(1), "frobnicate", []);
    let boom = proxy.method(&[], &[failing], lobby);
    proxy.add_slot(lobby, "boom", boom);
    let env = proxy.child_environment(root);
    let handler = proxy.method(&["e"], &[Expr::Integer(41)], lobby);
    proxy.add_slot(env, "raise:", handler);

    let expr = Expr::send(Expr::implicit("boom", []), "+", [Expr::Integer(1)]);
    let result = proxy.evaluate(&expr, lobby, env);
    assert_eq!(proxy.integer_value(result), Some(42));

    // The same send outside the handler's scope is unhandled.
    let result = proxy.evaluate(&expr, lobby, root);
    assert_eq!(proxy.exception_kind(result), Some(ExceptionKind::NoMethod));
}

#[test]
fn hidden_namespaces_hide_slots() {
    let vm = vm(1 << 17);
    let proxy = vm.proxy();
    let specials = proxy.specials();
    let root = specials.root_environment;
    let secret = proxy.intern("secret");

    let object = proxy.object(specials.null);
    proxy.add_slot_in(object, "hidden", proxy.integer(1), secret);
    proxy.add_slot(object, "shown", proxy.integer(2));

    let env = proxy.environment(root, specials.public_namespace, &[secret]);
    assert!(proxy.lookup(object, "hidden", root).is_some());
    assert_eq!(proxy.lookup(object, "hidden", env), None);
    assert!(proxy.lookup(object, "shown", env).is_some());

    let send = Expr::send(Expr::Value(object), "hidden", []);
    let result = proxy.evaluate(&send, specials.lobby, env);
    assert_eq!(proxy.exception_kind(result), Some(ExceptionKind::NoMethod));
    let result = proxy.evaluate(&send, specials.lobby, root);
    assert_eq!(proxy.integer_value(result), Some(1));
}

#[test]
fn exceptions_tunnel_out_of_async_nodes() {
    let vm = vm(1 << 17);
    let proxy = vm.proxy();
    let lobby = proxy.specials().lobby;
    let root = proxy.specials().root_environment;
    let env = proxy.child_environment(root);
    let handler = proxy.method(&["e"], &[Expr::Integer(-1)], lobby);
    proxy.add_slot(env, "raise:", handler);

    // (async 1 frobnicate) + 1: the waiter re-raises, its handler answers.
    let expr = Expr::send(
        Expr::spawn(Expr::send(Expr::Integer(1), "frobnicate", [])),
        "+",
        [Expr::Integer(1)],
    );
    let result = proxy.evaluate(&expr, lobby, env);
    assert_eq!(proxy.integer_value(result), Some(-1));

    let promise = proxy.async_call(root, proxy.integer(1), "frobnicate", &[]);
    let wrapped = proxy.wait(promise);
    let exception = proxy.tunneled_exception(wrapped).unwrap();
    assert_eq!(proxy.exception_kind(exception), Some(ExceptionKind::NoMethod));
}

#[test]
fn long_streams_run_in_a_small_arena() {
    let vm = vm(1 << 14);
    let proxy = vm.proxy();
    let lobby = proxy.specials().lobby;
    let root = proxy.specials().root_environment;
    let baseline = proxy.heap.collect().live_words;

    for round in 0..3 {
        let mut source = (0..1000)
            .map(|_| Expr::send(Expr::Integer(1), "+", [Expr::Integer(2)]))
            .map(ParseOutcome::from);
        let result = proxy.load(&mut source, lobby, root);
        assert_eq!(proxy.integer_value(result), Some(3), "round {round}");

        proxy.heap.collect();
        let census = proxy.heap.census();
        assert!(
            census.live_words < baseline + 512,
            "round {round}: {} live words",
            census.live_words
        );
    }
}
