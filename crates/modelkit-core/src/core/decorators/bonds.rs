use super::{Decorator, impl_decorator, required};
use crate::core::attributes::{AttributeKind, AttributeTable};
use crate::core::error::{ModelError, describe};
use crate::core::graph::GraphData;
use crate::core::keys::{FloatKey, IntKey, Key};
use crate::core::models::ids::{EdgeIndex, ParticleIndex};
use crate::core::models::store::ParticleStore;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Chemical classification of a bond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BondType {
    #[default]
    Unknown,
    NonBiological,
    Single,
    Double,
    Triple,
    Hydrogen,
    Salt,
    Peptide,
    Amide,
    Aromatic,
}

impl BondType {
    const ALL: [BondType; 10] = [
        BondType::Unknown,
        BondType::NonBiological,
        BondType::Single,
        BondType::Double,
        BondType::Triple,
        BondType::Hydrogen,
        BondType::Salt,
        BondType::Peptide,
        BondType::Amide,
        BondType::Aromatic,
    ];

    fn code(self) -> i64 {
        self as u8 as i64
    }

    fn from_code(code: i64) -> Option<Self> {
        usize::try_from(code).ok().and_then(|i| Self::ALL.get(i).copied())
    }
}

/// Returned when a string names no [`BondType`].
#[derive(Debug, Error)]
#[error("Invalid bond type string")]
pub struct ParseBondTypeError;

impl FromStr for BondType {
    type Err = ParseBondTypeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "nonbiological" | "non-biological" => Ok(Self::NonBiological),
            "1" | "s" | "single" => Ok(Self::Single),
            "2" | "d" | "double" => Ok(Self::Double),
            "3" | "t" | "triple" => Ok(Self::Triple),
            "h" | "hydrogen" => Ok(Self::Hydrogen),
            "salt" => Ok(Self::Salt),
            "peptide" => Ok(Self::Peptide),
            "amide" => Ok(Self::Amide),
            "ar" | "aromatic" => Ok(Self::Aromatic),
            _ => Err(ParseBondTypeError),
        }
    }
}

impl fmt::Display for BondType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Unknown => "Unknown",
                Self::NonBiological => "NonBiological",
                Self::Single => "Single",
                Self::Double => "Double",
                Self::Triple => "Triple",
                Self::Hydrogen => "Hydrogen",
                Self::Salt => "Salt",
                Self::Peptide => "Peptide",
                Self::Amide => "Amide",
                Self::Aromatic => "Aromatic",
            }
        )
    }
}

struct BondKeys {
    kind: IntKey,
    order: IntKey,
    length: FloatKey,
    stiffness: FloatKey,
}

fn bond_keys() -> &'static BondKeys {
    static KEYS: OnceLock<BondKeys> = OnceLock::new();
    KEYS.get_or_init(|| BondKeys {
        kind: IntKey::new("bond type"),
        order: IntKey::new("bond order"),
        length: FloatKey::new("bond length"),
        stiffness: FloatKey::new("bond stiffness"),
    })
}

fn bond_graph() -> GraphData {
    static GRAPH: OnceLock<GraphData> = OnceLock::new();
    *GRAPH.get_or_init(|| GraphData::new("bonds"))
}

/// A particle that can take part in bonds: a node of the bond graph.
pub struct Bonded<P> {
    store: P,
    index: ParticleIndex,
}

fn is_bonded(store: &ParticleStore, index: ParticleIndex) -> bool {
    store.graph_is_node(bond_graph(), index)
}

impl_decorator!(Bonded, "Bonded", "membership in the bond graph", is_bonded);

impl<'a> Bonded<&'a ParticleStore> {
    /// The graph holding every bond.
    pub fn graph() -> GraphData {
        bond_graph()
    }
}

impl<'a> Bonded<&'a mut ParticleStore> {
    /// Makes `index` a node of the bond graph.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyDecorated` if the particle is already bonded.
    pub fn setup_particle(store: &'a mut ParticleStore, index: ParticleIndex) -> Result<Self, ModelError> {
        let particle = store.particle(index)?;
        if is_bonded(store, index) {
            return Err(ModelError::AlreadyDecorated {
                particle: describe(particle.name(), index),
                decorator: "Bonded",
            });
        }
        store.graph_initialize_node(bond_graph(), index)?;
        Ok(Self { store, index })
    }
}

impl<P: Deref<Target = ParticleStore>> Bonded<P> {
    /// Number of bonds incident to this particle.
    pub fn number_of_bonds(&self) -> usize {
        required(self.store.graph_get_number_of_edges(bond_graph(), self.index))
    }

    /// The bond in position `slot` of this particle's edge list.
    pub fn bond(&self, slot: usize) -> Result<Bond<&ParticleStore>, ModelError> {
        let edge = self.store.graph_get_edge(bond_graph(), self.index, slot)?;
        Ok(Bond {
            store: &*self.store,
            edge,
        })
    }

    /// The particle on the other end of bond `slot`.
    pub fn bonded_particle(&self, slot: usize) -> Result<ParticleIndex, ModelError> {
        self.store.graph_get_neighbor(bond_graph(), self.index, slot)
    }

    /// Every particle sharing a bond with this one.
    pub fn bonded_particles(&self) -> Vec<ParticleIndex> {
        required(self.store.graph_neighbors(bond_graph(), self.index))
    }
}

/// A view of one bond: an edge of the bond graph and its attributes.
pub struct Bond<P> {
    store: P,
    edge: EdgeIndex,
}

impl<P: Deref<Target = ParticleStore>> Bond<P> {
    pub fn index(&self) -> EdgeIndex {
        self.edge
    }

    fn attributes(&self) -> &AttributeTable {
        required(self.store.graph_edge_attributes(bond_graph(), self.edge))
    }

    /// Endpoint `i` of the bond (0 or 1).
    pub fn bonded(&self, i: usize) -> Result<ParticleIndex, ModelError> {
        self.store.graph_get_node(bond_graph(), self.edge, i)
    }

    /// The two bonded particles, in the order they were passed to [`bond`].
    pub fn endpoints(&self) -> [ParticleIndex; 2] {
        [required(self.bonded(0)), required(self.bonded(1))]
    }

    pub fn bond_type(&self) -> BondType {
        self.attributes()
            .get(bond_keys().kind)
            .and_then(|code| BondType::from_code(*code))
            .unwrap_or_default()
    }

    /// The bond order, `1` unless set.
    pub fn order(&self) -> i64 {
        self.attributes().get(bond_keys().order).copied().unwrap_or(1)
    }

    /// Equilibrium length, if one has been assigned.
    pub fn length(&self) -> Option<f64> {
        self.attributes().get(bond_keys().length).copied()
    }

    /// The spring constant, if one was set.
    pub fn stiffness(&self) -> Option<f64> {
        self.attributes().get(bond_keys().stiffness).copied()
    }
}

impl<P: DerefMut<Target = ParticleStore>> Bond<P> {
    fn attributes_mut(&mut self) -> &mut AttributeTable {
        required(self.store.graph_edge_attributes_mut(bond_graph(), self.edge))
    }

    fn put<K: AttributeKind>(&mut self, key: Key<K>, value: K::Value) {
        let table = self.attributes_mut();
        if let Err(value) = table.insert(key, value) {
            table.replace(key, value);
        }
    }

    pub fn set_bond_type(&mut self, bond_type: BondType) {
        self.put(bond_keys().kind, bond_type.code());
    }

    pub fn set_order(&mut self, order: i64) {
        self.put(bond_keys().order, order);
    }

    /// Sets the equilibrium length. It must be finite and positive.
    pub fn set_length(&mut self, length: f64) -> Result<(), ModelError> {
        if !(length.is_finite() && length > 0.0) {
            return Err(ModelError::invalid(
                "Bond::set_length",
                format!("bond length must be positive, got {length}"),
            ));
        }
        self.put(bond_keys().length, length);
        Ok(())
    }

    /// Sets the spring constant. It must be finite and non-negative.
    pub fn set_stiffness(&mut self, stiffness: f64) -> Result<(), ModelError> {
        if !(stiffness.is_finite() && stiffness >= 0.0) {
            return Err(ModelError::invalid(
                "Bond::set_stiffness",
                format!("bond stiffness must be non-negative, got {stiffness}"),
            ));
        }
        self.put(bond_keys().stiffness, stiffness);
        Ok(())
    }
}

impl<P: Deref<Target = ParticleStore>> fmt::Debug for Bond<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bond")
            .field("edge", &self.edge)
            .field("type", &self.bond_type())
            .finish()
    }
}

/// Bonds two `Bonded` particles.
///
/// # Errors
///
/// `NotDecorated` if either particle is not `Bonded`, `InvalidValue` if `a == b`
/// or the two are already bonded.
pub fn bond(
    store: &mut ParticleStore,
    a: ParticleIndex,
    b: ParticleIndex,
    bond_type: BondType,
) -> Result<Bond<&mut ParticleStore>, ModelError> {
    Bonded::decorate(&*store, a)?;
    Bonded::decorate(&*store, b)?;
    let edge = store.graph_connect(bond_graph(), a, b)?;
    let mut bond = Bond { store, edge };
    bond.set_bond_type(bond_type);
    bond.set_order(1);
    Ok(bond)
}

/// The bond between `a` and `b`, if any.
pub fn get_bond(store: &ParticleStore, a: ParticleIndex, b: ParticleIndex) -> Option<Bond<&ParticleStore>> {
    store
        .graph_get_edge_between(bond_graph(), a, b)
        .map(|edge| Bond { store, edge })
}

/// Removes a bond from both endpoints.
pub fn unbond(store: &mut ParticleStore, bond: EdgeIndex) -> Result<(), ModelError> {
    store.graph_disconnect(bond_graph(), bond)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    fn bonded_pair() -> (ParticleStore, ParticleIndex, ParticleIndex) {
        let mut store = ParticleStore::new();
        let a = store.add_particle("A");
        let b = store.add_particle("B");
        Bonded::setup_particle(&mut store, a).unwrap();
        Bonded::setup_particle(&mut store, b).unwrap();
        (store, a, b)
    }

    mod bond_type {
        use super::*;

        #[test]
        fn parses_common_spellings() {
            assert_eq!("single".parse::<BondType>().unwrap(), BondType::Single);
            assert_eq!("2".parse::<BondType>().unwrap(), BondType::Double);
            assert_eq!("AR".parse::<BondType>().unwrap(), BondType::Aromatic);
            assert_eq!("Peptide".parse::<BondType>().unwrap(), BondType::Peptide);
            assert!("quadruple".parse::<BondType>().is_err());
        }

        #[test]
        fn display_round_trips_through_parse() {
            for bond_type in BondType::ALL {
                assert_eq!(bond_type.to_string().parse::<BondType>().unwrap(), bond_type);
                assert_eq!(BondType::from_code(bond_type.code()), Some(bond_type));
            }
            assert_eq!(BondType::from_code(-1), None);
            assert_eq!(BondType::default(), BondType::Unknown);
        }
    }

    mod bonding {
        use super::*;

        #[test]
        fn bond_get_bond_unbond_scenario() {
            let (mut store, a, b) = bonded_pair();
            bond(&mut store, a, b, BondType::Single).unwrap();

            let found = get_bond(&store, a, b).expect("bond should exist");
            let mut ends = found.endpoints();
            ends.sort();
            let mut expected = [a, b];
            expected.sort();
            assert_eq!(ends, expected);
            assert_eq!(found.bond_type(), BondType::Single);
            assert_eq!(get_bond(&store, b, a).map(|bond| bond.index()), Some(found.index()));

            let edge = found.index();
            unbond(&mut store, edge).unwrap();
            assert!(get_bond(&store, a, b).is_none());
            assert_eq!(Bonded::decorate(&store, a).unwrap().number_of_bonds(), 0);
        }

        #[test]
        fn bonding_requires_bonded_particles() {
            let mut store = ParticleStore::new();
            let a = store.add_particle("A");
            let b = store.add_particle("B");
            Bonded::setup_particle(&mut store, a).unwrap();
            let err = bond(&mut store, a, b, BondType::Single).unwrap_err();
            assert!(matches!(err, ModelError::NotDecorated { decorator: "Bonded", .. }));
            assert_eq!(Bonded::decorate(&store, a).unwrap().number_of_bonds(), 0);
        }

        #[test]
        fn self_bond_and_duplicate_bond_are_value_errors() {
            let (mut store, a, b) = bonded_pair();
            assert_eq!(bond(&mut store, a, a, BondType::Single).unwrap_err().kind(), ErrorKind::Value);
            bond(&mut store, a, b, BondType::Single).unwrap();
            assert_eq!(bond(&mut store, b, a, BondType::Double).unwrap_err().kind(), ErrorKind::Value);
            assert_eq!(get_bond(&store, a, b).unwrap().bond_type(), BondType::Single);
        }

        #[test]
        fn bonded_lists_partners_in_bond_order() {
            let mut store = ParticleStore::new();
            let ids: Vec<_> = (0..3).map(|i| store.add_particle(format!("p{i}"))).collect();
            for id in &ids {
                Bonded::setup_particle(&mut store, *id).unwrap();
            }
            bond(&mut store, ids[0], ids[1], BondType::Single).unwrap();
            bond(&mut store, ids[0], ids[2], BondType::Double).unwrap();
            let center = Bonded::decorate(&store, ids[0]).unwrap();
            assert_eq!(center.number_of_bonds(), 2);
            assert_eq!(center.bonded_particles(), vec![ids[1], ids[2]]);
            assert_eq!(center.bond(1).unwrap().bond_type(), BondType::Double);
            assert!(center.bond(2).is_err());
        }

        #[test]
        fn bond_parameters_are_stored_on_the_edge() {
            let (mut store, a, b) = bonded_pair();
            let mut created = bond(&mut store, a, b, BondType::Peptide).unwrap();
            assert_eq!(created.length(), None);
            created.set_length(1.33).unwrap();
            created.set_stiffness(500.0).unwrap();
            created.set_order(2);
            assert!(created.set_length(-1.0).is_err());

            let found = get_bond(&store, a, b).unwrap();
            assert_eq!(found.length(), Some(1.33));
            assert_eq!(found.stiffness(), Some(500.0));
            assert_eq!(found.order(), 2);
        }

        #[test]
        fn double_setup_is_a_usage_error() {
            let (mut store, a, _) = bonded_pair();
            let err = Bonded::setup_particle(&mut store, a).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Usage);
        }
    }
}
