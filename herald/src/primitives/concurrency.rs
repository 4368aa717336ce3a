use crate::{Exception, Flow, PrimitiveContext, Tag};

/// `node interpret` for async nodes: a promise of the node's expression,
/// computed on a fresh thread.
pub fn interpret_async(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let node = ctx.receiver();
    let parts = ctx.parts();
    let vm = ctx.vm();
    let expression = vm.heap.hidden(node);
    let promise = vm.new_promise();
    let dynamic_env = vm.tunnel_environment(parts.dynamic_env);
    vm.spawn_thread(
        promise,
        vm.selectors().interpret,
        &[expression],
        parts.env,
        dynamic_env,
    );
    Ok(Flow::Return(promise))
}

/// `internals newPromise`
pub fn new_promise(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    Ok(Flow::Return(ctx.vm().new_promise()))
}

/// `internals fulfill: promise with: value`, answers whether this call won.
pub fn fulfill_with(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let promise = ctx.arg(0)?;
    let value = ctx.arg(1)?;
    let vm = ctx.vm();
    let won = vm.heap.tag(promise) == Some(Tag::Promise) && vm.fulfill(promise, value);
    Ok(Flow::Return(vm.boolean(won)))
}

/// `target asChannel`
pub fn as_channel(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    Ok(Flow::Return(ctx.vm().new_channel(ctx.receiver())))
}

/// `target asActor`
pub fn as_actor(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    Ok(Flow::Return(ctx.vm().new_actor(ctx.receiver())))
}
