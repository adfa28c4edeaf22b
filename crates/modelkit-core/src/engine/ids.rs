use slotmap::new_key_type;

new_key_type! {
    /// Handle of a score state registered with a model.
    pub struct ScoreStateId;
    /// Handle of a restraint registered with a model.
    pub struct RestraintId;
}
