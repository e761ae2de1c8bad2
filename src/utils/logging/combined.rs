//! A layer fanning out to a runtime-defined list of sub-layers.
//!
//! Each configured logging output becomes one `Layer` (its filter plus its formatter), and all
//! outputs are combined again into a single `Layer` so the whole set can be swapped through one
//! `reload::Handle` whenever the configuration changes.
use std::ops::ControlFlow;

use tracing_core::{
    callsite, span,
    subscriber::{Interest, Subscriber},
    Event, Metadata,
};
use tracing_subscriber::layer::{Context, Layer as LayerTrait};

type BoxedLayer<S> = Box<dyn LayerTrait<S> + Send + Sync + 'static>;

/// Wraps a vec of `Layer`s
pub struct Layer<S> {
    inners: Vec<BoxedLayer<S>>,
}

impl<S> LayerTrait<S> for Layer<S>
where
    S: Subscriber,
{
    #[inline]
    fn register_callsite(&self, metadata: &'static Metadata<'static>) -> Interest {
        // stop at the first layer that is not `always`, so that a `never` disables the callsite
        // and a `sometimes` forces filters to be re-evaluated
        let folded = self.inners.iter().try_fold(Interest::always(), |acc, layer| {
            if acc.is_always() {
                ControlFlow::Continue(layer.register_callsite(metadata))
            } else {
                ControlFlow::Break(acc)
            }
        });
        match folded {
            ControlFlow::Break(interest) | ControlFlow::Continue(interest) => interest,
        }
    }

    #[inline]
    fn enabled(&self, metadata: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        self.inners.iter().all(|layer| layer.enabled(metadata, ctx.clone()))
    }

    #[inline]
    fn new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        for layer in self.inners.iter() {
            layer.new_span(attrs, id, ctx.clone());
        }
    }

    #[inline]
    fn on_record(&self, span: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        for layer in self.inners.iter() {
            layer.on_record(span, values, ctx.clone());
        }
    }

    #[inline]
    fn on_follows_from(&self, span: &span::Id, follows: &span::Id, ctx: Context<'_, S>) {
        for layer in self.inners.iter() {
            layer.on_follows_from(span, follows, ctx.clone());
        }
    }

    #[inline]
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        for layer in self.inners.iter() {
            layer.on_event(event, ctx.clone());
        }
    }

    #[inline]
    fn on_enter(&self, id: &span::Id, ctx: Context<'_, S>) {
        for layer in self.inners.iter() {
            layer.on_enter(id, ctx.clone());
        }
    }

    #[inline]
    fn on_exit(&self, id: &span::Id, ctx: Context<'_, S>) {
        for layer in self.inners.iter() {
            layer.on_exit(id, ctx.clone());
        }
    }

    #[inline]
    fn on_close(&self, id: span::Id, ctx: Context<'_, S>) {
        for layer in self.inners.iter() {
            layer.on_close(id.clone(), ctx.clone());
        }
    }

    #[inline]
    fn on_id_change(&self, old: &span::Id, new: &span::Id, ctx: Context<'_, S>) {
        for layer in self.inners.iter() {
            layer.on_id_change(old, new, ctx.clone());
        }
    }
}

impl<S> Layer<S>
where
    S: Subscriber,
{
    /// A layer that forwards to nothing, used before the configuration is loaded
    pub fn empty() -> Self {
        Self { inners: vec![] }
    }

    pub fn new<T, L>(iter: T) -> Self
    where
        T: IntoIterator<Item = L>,
        L: LayerTrait<S> + Send + Sync + 'static,
    {
        let mut this = Self::empty();
        this.extend(iter);
        this
    }

    pub fn add<L>(&mut self, layer: L) -> &mut Self
    where
        L: LayerTrait<S> + Send + Sync + 'static,
    {
        self.inners.push(Box::new(layer));
        callsite::rebuild_interest_cache();
        self
    }
}

impl<S, L> Extend<L> for Layer<S>
where
    S: Subscriber,
    L: LayerTrait<S> + Send + Sync + 'static,
{
    fn extend<T>(&mut self, iter: T)
    where
        T: IntoIterator<Item = L>,
    {
        self.inners
            .extend(iter.into_iter().map(|l| -> BoxedLayer<S> { Box::new(l) }));
        callsite::rebuild_interest_cache();
    }
}
