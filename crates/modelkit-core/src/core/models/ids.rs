use slotmap::new_key_type;

new_key_type! {
    /// Generational handle of a particle; stale handles never alias new particles.
    pub struct ParticleIndex;
    /// Generational handle of a graph edge.
    pub struct EdgeIndex;
}
