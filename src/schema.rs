use std::{
    collections::{BTreeSet, HashMap},
    fs,
    path::Path,
};

use anyhow::{bail, Context, Result};
use log::{debug, warn};

use crate::{
    datatypes::{self, Builtin, Facets, WhiteSpace},
    xml::{self, local_name, Element},
};

const MAX_DEPTH: usize = 32;

pub trait SchemaValidator {
    /// Every validation error found in the document; empty when valid.
    fn validate(&self, root: &Element) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum MaxOccurs {
    Bounded(u32),
    Unbounded,
}

#[derive(Debug, Clone)]
struct Particle {
    min: u32,
    max: MaxOccurs,
    term: Term,
}

impl Particle {
    fn once(term: Term) -> Self {
        Particle {
            min: 1,
            max: MaxOccurs::Bounded(1),
            term,
        }
    }

    fn repeats(&self) -> bool {
        self.max != MaxOccurs::Bounded(1)
    }
}

#[derive(Debug, Clone)]
enum Term {
    Element(Box<ElementDecl>),
    ElementRef(String),
    Sequence(Vec<Particle>),
    Choice(Vec<Particle>),
    All(Vec<Particle>),
    Group(String),
    Any,
}

#[derive(Debug, Clone)]
struct ElementDecl {
    name: String,
    kind: TypeDef,
}

#[derive(Debug, Clone)]
enum TypeDef {
    Named(String),
    Complex(Box<ComplexType>),
    Simple(SimpleType),
    AnyType,
}

#[derive(Debug, Clone, Default)]
struct SimpleType {
    base: Option<String>,
    /// Anonymous base, from a nested `simpleType` or an inherited simple content.
    anonymous_base: Option<Box<SimpleType>>,
    facets: Facets,
    variety: Variety,
}

impl SimpleType {
    fn named(name: &str) -> Self {
        SimpleType {
            base: Some(name.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
enum Variety {
    #[default]
    Atomic,
    List(Box<SimpleType>),
    Union(Vec<SimpleType>),
}

/// Where a simple type chain ends once user restrictions are peeled off.
#[derive(Clone, Copy)]
enum Primitive<'s> {
    Builtin(&'s str, Builtin),
    List(&'s SimpleType),
    Union(&'s [SimpleType]),
    Unknown,
}

#[derive(Debug, Clone)]
enum Derivation {
    Extension(String),
    Restriction(String),
}

#[derive(Debug, Clone, Default)]
enum Content {
    #[default]
    Empty,
    Elements(Particle),
    /// Character data; `None` means the value type comes from the base.
    Text(Option<SimpleType>),
}

#[derive(Debug, Clone)]
struct AttributeDecl {
    name: String,
    required: bool,
    simple: Option<SimpleType>,
}

#[derive(Debug, Clone)]
enum AttributeUse {
    Decl(AttributeDecl),
    Group(String),
}

#[derive(Debug, Clone, Default)]
struct AttributeGroup {
    uses: Vec<AttributeUse>,
    any_attribute: bool,
}

#[derive(Debug, Clone, Default)]
struct ComplexType {
    mixed: bool,
    derivation: Option<Derivation>,
    content: Content,
    attributes: Vec<AttributeUse>,
    any_attribute: bool,
}

/// A complex type with its derivation chain and attribute groups folded in.
#[derive(Debug, Clone, Default)]
struct Effective {
    mixed: bool,
    content: Content,
    attributes: Vec<AttributeDecl>,
    any_attribute: bool,
}

enum Resolved {
    Any,
    Simple(SimpleType),
    Complex(Effective),
}

#[derive(Debug)]
struct Miss {
    pos: usize,
    expected: Vec<String>,
}

/// Validator for the subset of XML Schema used by the delivery schema:
/// global and local element declarations, element refs, named and anonymous
/// complex and simple types, sequence/choice/all model groups, named groups,
/// occurrence bounds, attribute uses and groups, simple and mixed content,
/// the built-in datatypes, list and union types and the constraining facets.
/// Namespaces are matched by local name. Components that are not supported
/// (includes, imports, identity constraints, undefined types) are reported
/// with a warning when the schema is loaded.
#[derive(Debug, Default)]
pub struct XsdSchema {
    elements: HashMap<String, ElementDecl>,
    complex_types: HashMap<String, ComplexType>,
    simple_types: HashMap<String, SimpleType>,
    groups: HashMap<String, Particle>,
    attribute_groups: HashMap<String, AttributeGroup>,
}

impl XsdSchema {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Failed to load schema: {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let root = xml::parse(text)?;
        if root.local_name() != "schema" {
            bail!("Root element is '{}', expected a schema", root.name);
        }

        let mut schema = XsdSchema::default();
        for child in root.child_elements() {
            match child.local_name() {
                "element" => {
                    let decl = parse_element_decl(child)?;
                    schema.elements.insert(decl.name.clone(), decl);
                }
                "complexType" => {
                    let name = required_attribute(child, "name")?;
                    schema.complex_types.insert(name, parse_complex_type(child)?);
                }
                "simpleType" => {
                    let name = required_attribute(child, "name")?;
                    schema.simple_types.insert(name, parse_simple_type(child));
                }
                "group" => {
                    let name = required_attribute(child, "name")?;
                    for grandchild in child.child_elements() {
                        if let Some(particle) = parse_particle(grandchild)? {
                            schema.groups.insert(name.clone(), particle);
                            break;
                        }
                    }
                }
                "attributeGroup" => {
                    let name = required_attribute(child, "name")?;
                    let mut group = AttributeGroup::default();
                    for grandchild in child.child_elements() {
                        parse_attribute_use(grandchild, &mut group.uses, &mut group.any_attribute)?;
                    }
                    schema.attribute_groups.insert(name, group);
                }
                "include" | "import" | "redefine" | "override" => warn!(
                    "Schema {} of '{}' is not supported; its components are unavailable",
                    child.local_name(),
                    child.attribute("schemaLocation").unwrap_or("?")
                ),
                "annotation" | "notation" => {}
                other => warn!("Schema component '{}' is not supported and is ignored", other),
            }
        }

        for name in schema.unresolved_types() {
            warn!("Type '{}' is not defined in the schema; its values are not checked", name);
        }

        debug!(
            "Schema loaded: {} elements, {} complex types, {} simple types, {} groups",
            schema.elements.len(),
            schema.complex_types.len(),
            schema.simple_types.len(),
            schema.groups.len()
        );
        Ok(schema)
    }

    fn resolve_type(&self, kind: &TypeDef) -> Resolved {
        match kind {
            TypeDef::AnyType => Resolved::Any,
            TypeDef::Simple(st) => Resolved::Simple(st.clone()),
            TypeDef::Complex(ct) => Resolved::Complex(self.effective(ct, 0)),
            TypeDef::Named(name) => match self.complex_types.get(name) {
                Some(ct) => Resolved::Complex(self.effective(ct, 0)),
                None if name == "anyType" => Resolved::Any,
                None => Resolved::Simple(SimpleType::named(name)),
            },
        }
    }

    fn effective(&self, ct: &ComplexType, depth: usize) -> Effective {
        let (attributes, any_attribute) = self.expand_attributes(&ct.attributes, depth);
        let mut eff = Effective {
            mixed: ct.mixed,
            content: ct.content.clone(),
            attributes,
            any_attribute: ct.any_attribute || any_attribute,
        };

        let (base, extension) = match &ct.derivation {
            None => return eff,
            Some(Derivation::Extension(base)) => (base, true),
            Some(Derivation::Restriction(base)) => (base, false),
        };

        match self.complex_types.get(base) {
            Some(base_ct) if depth < MAX_DEPTH => {
                let base_eff = self.effective(base_ct, depth + 1);
                eff.content = match (base_eff.content, eff.content) {
                    (base_content, Content::Text(None)) => match base_content {
                        Content::Text(st) => Content::Text(st),
                        _ => Content::Text(None),
                    },
                    (Content::Text(Some(base_st)), Content::Text(Some(mut st)))
                        if st.base.is_none() && st.anonymous_base.is_none() =>
                    {
                        st.anonymous_base = Some(Box::new(base_st));
                        Content::Text(Some(st))
                    }
                    (Content::Elements(first), Content::Elements(second)) if extension => {
                        Content::Elements(Particle::once(Term::Sequence(vec![first, second])))
                    }
                    (base_content, Content::Empty) if extension => base_content,
                    (_, own) => own,
                };
                let mut merged = base_eff.attributes;
                for decl in eff.attributes {
                    match merged.iter_mut().find(|d| d.name == decl.name) {
                        Some(slot) => *slot = decl,
                        None => merged.push(decl),
                    }
                }
                eff.attributes = merged;
                eff.any_attribute |= base_eff.any_attribute;
                eff.mixed |= base_eff.mixed;
            }
            Some(_) => {}
            None => {
                eff.content = match eff.content {
                    Content::Text(None) => Content::Text(Some(SimpleType::named(base))),
                    Content::Text(Some(mut st)) => {
                        if st.base.is_none() && st.anonymous_base.is_none() {
                            st.base = Some(base.clone());
                        }
                        Content::Text(Some(st))
                    }
                    other => other,
                };
            }
        }
        eff
    }

    fn expand_attributes(&self, uses: &[AttributeUse], depth: usize) -> (Vec<AttributeDecl>, bool) {
        let mut decls = Vec::new();
        let mut any_attribute = false;
        for attr_use in uses {
            match attr_use {
                AttributeUse::Decl(decl) => decls.push(decl.clone()),
                AttributeUse::Group(name) => {
                    let Some(group) = self.attribute_groups.get(name) else {
                        continue;
                    };
                    if depth >= MAX_DEPTH {
                        continue;
                    }
                    let (nested, nested_any) = self.expand_attributes(&group.uses, depth + 1);
                    decls.extend(nested);
                    any_attribute |= group.any_attribute || nested_any;
                }
            }
        }
        (decls, any_attribute)
    }

    /// Follows `st` down its restriction chain, collecting the facets of
    /// every step, most derived first.
    fn primitive<'s>(&'s self, st: &'s SimpleType, levels: &mut Vec<&'s Facets>) -> Primitive<'s> {
        let mut current = st;
        for _ in 0..MAX_DEPTH {
            levels.push(&current.facets);
            match &current.variety {
                Variety::List(item) => return Primitive::List(item.as_ref()),
                Variety::Union(members) => return Primitive::Union(members.as_slice()),
                Variety::Atomic => {}
            }
            if let Some(base) = &current.anonymous_base {
                current = base.as_ref();
                continue;
            }
            let Some(name) = current.base.as_deref() else {
                return Primitive::Builtin("anySimpleType", Builtin::AnySimpleType);
            };
            if let Some(named) = self.simple_types.get(name) {
                current = named;
                continue;
            }
            return match datatypes::lookup(name) {
                Some(builtin) => Primitive::Builtin(name, builtin),
                None => Primitive::Unknown,
            };
        }
        Primitive::Unknown
    }

    fn value_errors(&self, value: &str, st: &SimpleType, depth: usize) -> Vec<String> {
        if depth > MAX_DEPTH {
            return Vec::new();
        }
        let mut levels = Vec::new();
        let primitive = self.primitive(st, &mut levels);
        let white_space = levels
            .iter()
            .find_map(|facets| facets.white_space)
            .unwrap_or(match primitive {
                Primitive::Builtin(_, builtin) => builtin.white_space(),
                Primitive::List(_) | Primitive::Union(_) => WhiteSpace::Collapse,
                Primitive::Unknown => WhiteSpace::Preserve,
            });
        let value = white_space.normalize(value);

        let (builtin, length) = match primitive {
            Primitive::Builtin(name, builtin) => {
                if !builtin.accepts(&value) {
                    return vec![format!(
                        "'{}' is not a valid value of the atomic type 'xs:{}'.",
                        value, name
                    )];
                }
                (Some(builtin), builtin.length(&value))
            }
            Primitive::List(item) => {
                let items: Vec<&str> = value.split(' ').filter(|i| !i.is_empty()).collect();
                for token in &items {
                    let errors = self.value_errors(token, item, depth + 1);
                    if !errors.is_empty() {
                        return errors;
                    }
                }
                (None, items.len())
            }
            Primitive::Union(members) => {
                if !members
                    .iter()
                    .any(|member| self.value_errors(&value, member, depth + 1).is_empty())
                {
                    return vec![format!("'{}' is not a valid value of the union type.", value)];
                }
                (None, value.chars().count())
            }
            Primitive::Unknown => (None, value.chars().count()),
        };

        levels
            .iter()
            .rev()
            .flat_map(|facets| facets.violations(&value, builtin, length))
            .collect()
    }

    /// Type names referenced but neither declared nor built in.
    fn unresolved_types(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for decl in self.elements.values() {
            collect_decl_types(decl, &mut names);
        }
        for ct in self.complex_types.values() {
            collect_complex_types(ct, &mut names);
        }
        for st in self.simple_types.values() {
            collect_simple_types(st, &mut names);
        }
        for particle in self.groups.values() {
            collect_particle_types(particle, &mut names);
        }
        for group in self.attribute_groups.values() {
            collect_attribute_types(&group.uses, &mut names);
        }
        names.retain(|name| {
            name != "anyType"
                && !self.complex_types.contains_key(name)
                && !self.simple_types.contains_key(name)
                && datatypes::lookup(name).is_none()
        });
        names
    }

    fn validate_element(&self, el: &Element, kind: &TypeDef, errors: &mut Vec<String>) {
        match self.resolve_type(kind) {
            Resolved::Any => {}
            Resolved::Simple(st) => {
                self.check_attributes(el, &[], false, errors);
                if el.child_elements().next().is_some() {
                    errors.push(format!(
                        "Element '{}': Element content is not allowed, because the type definition is simple.",
                        el.name
                    ));
                } else {
                    self.check_value(&format!("Element '{}'", el.name), &el.text(), &st, errors);
                }
            }
            Resolved::Complex(eff) => self.validate_complex(el, &eff, errors),
        }
    }

    fn validate_complex(&self, el: &Element, eff: &Effective, errors: &mut Vec<String>) {
        self.check_attributes(el, &eff.attributes, eff.any_attribute, errors);

        match &eff.content {
            Content::Empty => {
                if let Some(child) = el.child_elements().next() {
                    errors.push(format!("Element '{}': This element is not expected.", child.name));
                }
                if !eff.mixed && el.has_text() {
                    errors.push(format!(
                        "Element '{}': Character content is not allowed, because the content type is empty.",
                        el.name
                    ));
                }
            }
            Content::Text(st) => {
                if el.child_elements().next().is_some() {
                    errors.push(format!(
                        "Element '{}': Element content is not allowed, because the content type is a simple type definition.",
                        el.name
                    ));
                } else if let Some(st) = st {
                    self.check_value(&format!("Element '{}'", el.name), &el.text(), st, errors);
                }
            }
            Content::Elements(particle) => {
                if !eff.mixed && el.has_text() {
                    errors.push(format!(
                        "Element '{}': Character content other than whitespace is not allowed because the content type is 'element-only'.",
                        el.name
                    ));
                }

                let children: Vec<&Element> = el.child_elements().collect();
                let names: Vec<&str> = children.iter().map(|c| c.local_name()).collect();
                let matched = match self.match_particle(particle, &names, 0, 0) {
                    Ok(end) => {
                        if end < children.len() {
                            errors.push(format!(
                                "Element '{}': This element is not expected.",
                                children[end].name
                            ));
                        }
                        end
                    }
                    Err(miss) => {
                        let expected = expected_list(&miss.expected);
                        if miss.pos < children.len() {
                            errors.push(format!(
                                "Element '{}': This element is not expected. Expected is {}.",
                                children[miss.pos].name, expected
                            ));
                        } else {
                            errors.push(format!(
                                "Element '{}': Missing child element(s). Expected is {}.",
                                el.name, expected
                            ));
                        }
                        miss.pos.min(children.len())
                    }
                };

                for child in &children[..matched] {
                    let decl = self
                        .find_local_decl(particle, child.local_name(), 0)
                        .or_else(|| self.elements.get(child.local_name()).map(|d| d.kind.clone()));
                    if let Some(kind) = decl {
                        self.validate_element(child, &kind, errors);
                    }
                }
            }
        }
    }

    fn check_attributes(
        &self,
        el: &Element,
        decls: &[AttributeDecl],
        any_attribute: bool,
        errors: &mut Vec<String>,
    ) {
        for (name, value) in &el.attributes {
            if is_namespace_attribute(name) {
                continue;
            }
            match decls.iter().find(|d| d.name == local_name(name)) {
                Some(decl) => {
                    if let Some(st) = &decl.simple {
                        let context = format!("Element '{}', attribute '{}'", el.name, name);
                        self.check_value(&context, value, st, errors);
                    }
                }
                None if any_attribute => {}
                None => errors.push(format!(
                    "Element '{}', attribute '{}': The attribute '{}' is not allowed.",
                    el.name, name, name
                )),
            }
        }

        for decl in decls.iter().filter(|d| d.required) {
            if !el.attributes.iter().any(|(n, _)| local_name(n) == decl.name) {
                errors.push(format!(
                    "Element '{}': The attribute '{}' is required but missing.",
                    el.name, decl.name
                ));
            }
        }
    }

    fn check_value(&self, context: &str, value: &str, st: &SimpleType, errors: &mut Vec<String>) {
        for message in self.value_errors(value, st, 0) {
            errors.push(format!("{}: {}", context, message));
        }
    }

    fn match_particle(
        &self,
        particle: &Particle,
        names: &[&str],
        start: usize,
        depth: usize,
    ) -> Result<usize, Miss> {
        if depth > MAX_DEPTH {
            return Ok(start);
        }
        let mut count = 0u32;
        let mut pos = start;
        loop {
            if let MaxOccurs::Bounded(max) = particle.max {
                if count >= max {
                    break;
                }
            }
            match self.match_term(&particle.term, names, pos, depth) {
                Ok(next) if next > pos => {
                    count += 1;
                    pos = next;
                }
                Ok(_) => break,
                Err(miss) => {
                    if count >= particle.min {
                        break;
                    }
                    return Err(miss);
                }
            }
        }
        Ok(pos)
    }

    fn match_term(&self, term: &Term, names: &[&str], pos: usize, depth: usize) -> Result<usize, Miss> {
        match term {
            Term::Element(decl) => match_name(&decl.name, names, pos),
            Term::ElementRef(name) => match_name(name, names, pos),
            Term::Any => {
                if pos < names.len() {
                    Ok(pos + 1)
                } else {
                    Err(Miss {
                        pos,
                        expected: vec!["*".to_string()],
                    })
                }
            }
            Term::Group(name) => match self.groups.get(name) {
                Some(group) => self.match_particle(group, names, pos, depth + 1),
                None => Ok(pos),
            },
            Term::Sequence(particles) => {
                let mut pos = pos;
                let mut optional: Vec<String> = Vec::new();
                for p in particles {
                    match self.match_particle(p, names, pos, depth + 1) {
                        Ok(next) => {
                            if next != pos {
                                optional.clear();
                            }
                            if next == pos || p.repeats() {
                                optional.extend(self.first_names(p, depth + 1));
                            }
                            pos = next;
                        }
                        Err(mut miss) => {
                            if miss.pos == pos {
                                optional.append(&mut miss.expected);
                                miss.expected = optional;
                            }
                            return Err(miss);
                        }
                    }
                }
                Ok(pos)
            }
            Term::Choice(particles) => {
                let mut best: Option<usize> = None;
                let mut furthest: Option<Miss> = None;
                for p in particles {
                    match self.match_particle(p, names, pos, depth + 1) {
                        Ok(next) => best = Some(best.map_or(next, |b| b.max(next))),
                        Err(miss) => {
                            furthest = Some(match furthest {
                                Some(mut current) if current.pos == miss.pos => {
                                    current.expected.extend(miss.expected);
                                    current
                                }
                                Some(current) if current.pos > miss.pos => current,
                                _ => miss,
                            });
                        }
                    }
                }
                match (best, furthest) {
                    (Some(next), _) => Ok(next),
                    (None, Some(miss)) => Err(miss),
                    (None, None) => Ok(pos),
                }
            }
            Term::All(particles) => {
                let mut pos = pos;
                let mut used = vec![false; particles.len()];
                'outer: while pos < names.len() {
                    for (i, p) in particles.iter().enumerate() {
                        if used[i] {
                            continue;
                        }
                        if let Ok(next) = self.match_particle(p, names, pos, depth + 1) {
                            if next > pos {
                                used[i] = true;
                                pos = next;
                                continue 'outer;
                            }
                        }
                    }
                    break;
                }
                let missing: Vec<String> = particles
                    .iter()
                    .zip(&used)
                    .filter(|(p, used)| !**used && p.min > 0)
                    .flat_map(|(p, _)| self.first_names(p, depth + 1))
                    .collect();
                if missing.is_empty() {
                    Ok(pos)
                } else {
                    Err(Miss {
                        pos,
                        expected: missing,
                    })
                }
            }
        }
    }

    fn first_names(&self, particle: &Particle, depth: usize) -> Vec<String> {
        if depth > MAX_DEPTH {
            return Vec::new();
        }
        match &particle.term {
            Term::Element(decl) => vec![decl.name.clone()],
            Term::ElementRef(name) => vec![name.clone()],
            Term::Any => vec!["*".to_string()],
            Term::Group(name) => self
                .groups
                .get(name)
                .map(|g| self.first_names(g, depth + 1))
                .unwrap_or_default(),
            Term::Sequence(particles) => {
                let mut names = Vec::new();
                for p in particles {
                    names.extend(self.first_names(p, depth + 1));
                    if p.min > 0 {
                        break;
                    }
                }
                names
            }
            Term::Choice(particles) | Term::All(particles) => particles
                .iter()
                .flat_map(|p| self.first_names(p, depth + 1))
                .collect(),
        }
    }

    fn find_local_decl(&self, particle: &Particle, name: &str, depth: usize) -> Option<TypeDef> {
        if depth > MAX_DEPTH {
            return None;
        }
        match &particle.term {
            Term::Element(decl) if decl.name == name => Some(decl.kind.clone()),
            Term::ElementRef(reference) if reference == name => {
                self.elements.get(name).map(|d| d.kind.clone())
            }
            Term::Group(group) => self
                .groups
                .get(group)
                .and_then(|g| self.find_local_decl(g, name, depth + 1)),
            Term::Sequence(particles) | Term::Choice(particles) | Term::All(particles) => particles
                .iter()
                .find_map(|p| self.find_local_decl(p, name, depth + 1)),
            _ => None,
        }
    }
}

impl SchemaValidator for XsdSchema {
    fn validate(&self, root: &Element) -> Vec<String> {
        let mut errors = Vec::new();
        match self.elements.get(root.local_name()) {
            Some(decl) => self.validate_element(root, &decl.kind, &mut errors),
            None => errors.push(format!(
                "Element '{}': No matching global declaration available for the validation root.",
                root.name
            )),
        }
        errors
    }
}

fn collect_decl_types(decl: &ElementDecl, names: &mut BTreeSet<String>) {
    match &decl.kind {
        TypeDef::Named(name) => {
            names.insert(name.clone());
        }
        TypeDef::Complex(ct) => collect_complex_types(ct, names),
        TypeDef::Simple(st) => collect_simple_types(st, names),
        TypeDef::AnyType => {}
    }
}

fn collect_complex_types(ct: &ComplexType, names: &mut BTreeSet<String>) {
    if let Some(Derivation::Extension(base) | Derivation::Restriction(base)) = &ct.derivation {
        names.insert(base.clone());
    }
    match &ct.content {
        Content::Elements(particle) => collect_particle_types(particle, names),
        Content::Text(Some(st)) => collect_simple_types(st, names),
        _ => {}
    }
    collect_attribute_types(&ct.attributes, names);
}

fn collect_particle_types(particle: &Particle, names: &mut BTreeSet<String>) {
    match &particle.term {
        Term::Element(decl) => collect_decl_types(decl, names),
        Term::Sequence(particles) | Term::Choice(particles) | Term::All(particles) => {
            for p in particles {
                collect_particle_types(p, names);
            }
        }
        _ => {}
    }
}

fn collect_attribute_types(uses: &[AttributeUse], names: &mut BTreeSet<String>) {
    for attr_use in uses {
        if let AttributeUse::Decl(AttributeDecl { simple: Some(st), .. }) = attr_use {
            collect_simple_types(st, names);
        }
    }
}

fn collect_simple_types(st: &SimpleType, names: &mut BTreeSet<String>) {
    if let Some(base) = &st.base {
        names.insert(base.clone());
    }
    if let Some(base) = &st.anonymous_base {
        collect_simple_types(base, names);
    }
    match &st.variety {
        Variety::List(item) => collect_simple_types(item, names),
        Variety::Union(members) => {
            for member in members {
                collect_simple_types(member, names);
            }
        }
        Variety::Atomic => {}
    }
}

fn match_name(name: &str, names: &[&str], pos: usize) -> Result<usize, Miss> {
    if names.get(pos).is_some_and(|n| *n == name) {
        Ok(pos + 1)
    } else {
        Err(Miss {
            pos,
            expected: vec![name.to_string()],
        })
    }
}

fn expected_list(names: &[String]) -> String {
    let mut unique: Vec<&str> = Vec::new();
    for name in names {
        if !unique.contains(&name.as_str()) {
            unique.push(name);
        }
    }
    if unique.len() == 1 {
        format!("( {} )", unique[0])
    } else {
        format!("one of ( {} )", unique.join(", "))
    }
}

fn is_namespace_attribute(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:") || name.starts_with("xml:") || name.starts_with("xsi:")
}

fn required_attribute(el: &Element, key: &str) -> Result<String> {
    el.attribute(key)
        .map(|v| local_name(v).to_string())
        .with_context(|| format!("'{}' declaration without a '{}' attribute", el.name, key))
}

fn parse_occurs(el: &Element) -> Result<(u32, MaxOccurs)> {
    let min = match el.attribute("minOccurs") {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("Invalid minOccurs '{}'", v))?,
        None => 1,
    };
    let max = match el.attribute("maxOccurs") {
        Some("unbounded") => MaxOccurs::Unbounded,
        Some(v) => MaxOccurs::Bounded(
            v.trim()
                .parse()
                .with_context(|| format!("Invalid maxOccurs '{}'", v))?,
        ),
        None => MaxOccurs::Bounded(1),
    };
    Ok((min, max))
}

fn parse_particle(el: &Element) -> Result<Option<Particle>> {
    let term = match el.local_name() {
        "element" => match el.attribute("ref") {
            Some(reference) => Term::ElementRef(local_name(reference).to_string()),
            None => Term::Element(Box::new(parse_element_decl(el)?)),
        },
        "sequence" | "choice" | "all" => {
            let mut particles = Vec::new();
            for child in el.child_elements() {
                if let Some(p) = parse_particle(child)? {
                    particles.push(p);
                }
            }
            match el.local_name() {
                "sequence" => Term::Sequence(particles),
                "choice" => Term::Choice(particles),
                _ => Term::All(particles),
            }
        }
        "group" => Term::Group(required_attribute(el, "ref")?),
        "any" => Term::Any,
        _ => return Ok(None),
    };
    let (min, max) = parse_occurs(el)?;
    Ok(Some(Particle { min, max, term }))
}

fn parse_element_decl(el: &Element) -> Result<ElementDecl> {
    let name = required_attribute(el, "name")?;
    for constraint in el
        .child_elements()
        .filter(|c| matches!(c.local_name(), "key" | "keyref" | "unique"))
    {
        warn!(
            "Identity constraint '{}' on element '{}' is not checked",
            constraint.local_name(),
            name
        );
    }
    let kind = match el.attribute("type") {
        Some(type_name) => TypeDef::Named(local_name(type_name).to_string()),
        None => {
            let mut kind = TypeDef::AnyType;
            for child in el.child_elements() {
                match child.local_name() {
                    "complexType" => {
                        kind = TypeDef::Complex(Box::new(parse_complex_type(child)?));
                        break;
                    }
                    "simpleType" => {
                        kind = TypeDef::Simple(parse_simple_type(child));
                        break;
                    }
                    _ => {}
                }
            }
            kind
        }
    };
    Ok(ElementDecl { name, kind })
}

fn parse_complex_type(el: &Element) -> Result<ComplexType> {
    let mut ct = ComplexType {
        mixed: el.attribute("mixed") == Some("true"),
        ..Default::default()
    };

    for child in el.child_elements() {
        match child.local_name() {
            "sequence" | "choice" | "all" | "group" => {
                if let Some(p) = parse_particle(child)? {
                    ct.content = Content::Elements(p);
                }
            }
            "attribute" | "attributeGroup" | "anyAttribute" => {
                parse_attribute_use(child, &mut ct.attributes, &mut ct.any_attribute)?;
            }
            "simpleContent" | "complexContent" => {
                let simple = child.local_name() == "simpleContent";
                if child.attribute("mixed") == Some("true") {
                    ct.mixed = true;
                }
                for derivation in child.child_elements() {
                    let base = match derivation.local_name() {
                        "extension" | "restriction" => required_attribute(derivation, "base")?,
                        _ => continue,
                    };
                    let mut facets = Facets::default();
                    let mut anonymous_base = None;
                    for item in derivation.child_elements() {
                        if facets.read(item) {
                            continue;
                        }
                        match item.local_name() {
                            "simpleType" => anonymous_base = Some(Box::new(parse_simple_type(item))),
                            "attribute" | "attributeGroup" | "anyAttribute" => {
                                parse_attribute_use(item, &mut ct.attributes, &mut ct.any_attribute)?;
                            }
                            _ => {
                                if let Some(p) = parse_particle(item)? {
                                    ct.content = Content::Elements(p);
                                }
                            }
                        }
                    }
                    if simple {
                        ct.content = if facets.is_empty() && anonymous_base.is_none() {
                            Content::Text(None)
                        } else {
                            Content::Text(Some(SimpleType {
                                anonymous_base,
                                facets,
                                ..Default::default()
                            }))
                        };
                    }
                    ct.derivation = Some(if derivation.local_name() == "extension" {
                        Derivation::Extension(base)
                    } else {
                        Derivation::Restriction(base)
                    });
                }
            }
            _ => {}
        }
    }
    Ok(ct)
}

fn parse_attribute_use(el: &Element, uses: &mut Vec<AttributeUse>, any_attribute: &mut bool) -> Result<()> {
    match el.local_name() {
        "attribute" => {
            if el.attribute("use") == Some("prohibited") {
                return Ok(());
            }
            let name = match el.attribute("name").or_else(|| el.attribute("ref")) {
                Some(name) => local_name(name).to_string(),
                None => bail!("Attribute declaration without a name or ref"),
            };
            let simple = match el.attribute("type") {
                Some(type_name) => Some(SimpleType::named(local_name(type_name))),
                None => el
                    .child_elements()
                    .find(|c| c.local_name() == "simpleType")
                    .map(parse_simple_type),
            };
            uses.push(AttributeUse::Decl(AttributeDecl {
                name,
                required: el.attribute("use") == Some("required"),
                simple,
            }));
        }
        "attributeGroup" => uses.push(AttributeUse::Group(required_attribute(el, "ref")?)),
        "anyAttribute" => *any_attribute = true,
        _ => {}
    }
    Ok(())
}

fn parse_simple_type(el: &Element) -> SimpleType {
    let mut st = SimpleType::default();
    for child in el.child_elements() {
        match child.local_name() {
            "restriction" => {
                st.base = child.attribute("base").map(|b| local_name(b).to_string());
                for item in child.child_elements() {
                    if st.facets.read(item) {
                        continue;
                    }
                    match item.local_name() {
                        "simpleType" => st.anonymous_base = Some(Box::new(parse_simple_type(item))),
                        "annotation" => {}
                        other => warn!("Restriction component '{}' is not supported and is ignored", other),
                    }
                }
            }
            "list" => {
                let item = match child.attribute("itemType") {
                    Some(name) => SimpleType::named(local_name(name)),
                    None => child
                        .child_elements()
                        .find(|c| c.local_name() == "simpleType")
                        .map(parse_simple_type)
                        .unwrap_or_default(),
                };
                st.variety = Variety::List(Box::new(item));
            }
            "union" => {
                let mut members: Vec<SimpleType> = child
                    .attribute("memberTypes")
                    .map(|names| {
                        names
                            .split_whitespace()
                            .map(|name| SimpleType::named(local_name(name)))
                            .collect()
                    })
                    .unwrap_or_default();
                members.extend(
                    child
                        .child_elements()
                        .filter(|c| c.local_name() == "simpleType")
                        .map(parse_simple_type),
                );
                st.variety = Variety::Union(members);
            }
            _ => {}
        }
    }
    st
}

#[cfg(test)]
mod tests {
    use super::*;

    const XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="articles">
    <xs:complexType>
      <xs:sequence>
        <xs:element ref="article" maxOccurs="unbounded"/>
      </xs:sequence>
      <xs:attribute name="dtd-version" type="xs:string" use="required"/>
    </xs:complexType>
  </xs:element>
  <xs:element name="article" type="ArticleType"/>
  <xs:complexType name="ArticleType">
    <xs:sequence>
      <xs:element name="front" type="FrontType"/>
      <xs:element name="back" minOccurs="0"/>
    </xs:sequence>
    <xs:attribute name="article-type" type="ArticleKind" use="required"/>
    <xs:attribute ref="xml:lang"/>
  </xs:complexType>
  <xs:complexType name="FrontType">
    <xs:sequence>
      <xs:element name="title" type="TitleType"/>
      <xs:choice minOccurs="0" maxOccurs="unbounded">
        <xs:element name="author" type="xs:string"/>
        <xs:element name="collab" type="xs:string"/>
      </xs:choice>
      <xs:element name="pub-date" type="DateType"/>
    </xs:sequence>
  </xs:complexType>
  <xs:complexType name="TitleType" mixed="true">
    <xs:choice minOccurs="0" maxOccurs="unbounded">
      <xs:element name="italic" type="xs:string"/>
    </xs:choice>
  </xs:complexType>
  <xs:complexType name="DateType">
    <xs:simpleContent>
      <xs:extension base="xs:string">
        <xs:attribute name="pub-type" type="PubType" use="required"/>
      </xs:extension>
    </xs:simpleContent>
  </xs:complexType>
  <xs:simpleType name="ArticleKind">
    <xs:restriction base="xs:string">
      <xs:enumeration value="research-article"/>
      <xs:enumeration value="review-article"/>
    </xs:restriction>
  </xs:simpleType>
  <xs:simpleType name="PubType">
    <xs:restriction base="xs:string">
      <xs:enumeration value="epub"/>
      <xs:enumeration value="ppub"/>
    </xs:restriction>
  </xs:simpleType>
</xs:schema>"#;

    fn document(front: &str, article_attrs: &str) -> Element {
        xml::parse(&format!(
            r#"<articles dtd-version="1.10"><article {}>{}</article></articles>"#,
            article_attrs, front
        ))
        .unwrap()
    }

    const GOOD_FRONT: &str = r#"<front><title>Soil <italic>x</italic></title><author>A</author><collab>B</collab><author>C</author><pub-date pub-type="epub">2019</pub-date></front>"#;
    const GOOD_ATTRS: &str = r#"article-type="research-article" xml:lang="en""#;

    fn schema() -> XsdSchema {
        XsdSchema::parse(XSD).unwrap()
    }

    #[test]
    fn accepts_valid_document() {
        let errors = schema().validate(&document(GOOD_FRONT, GOOD_ATTRS));
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn reports_missing_children_with_expectations() {
        let doc = document("<front><title>t</title><author>A</author></front>", GOOD_ATTRS);
        assert_eq!(
            schema().validate(&doc),
            vec![
                "Element 'front': Missing child element(s). Expected is one of ( author, collab, pub-date )."
                    .to_string()
            ]
        );
    }

    #[test]
    fn reports_unexpected_child() {
        let doc = document(
            r#"<front><title>t</title><pub-date pub-type="ppub">2019</pub-date><author>A</author></front>"#,
            GOOD_ATTRS,
        );
        assert_eq!(
            schema().validate(&doc),
            vec!["Element 'author': This element is not expected.".to_string()]
        );
    }

    #[test]
    fn checks_attributes_and_enumerations() {
        let front = r#"<front><title>t</title><pub-date pub-type="online">2019</pub-date></front>"#;
        let errors = schema().validate(&document(front, r#"xml:lang="en""#));
        assert_eq!(
            errors,
            vec![
                "Element 'article': The attribute 'article-type' is required but missing.".to_string(),
                "Element 'pub-date', attribute 'pub-type': [facet 'enumeration'] The value 'online' is not an element of the set {'epub', 'ppub'}.".to_string(),
            ]
        );
    }

    #[test]
    fn rejects_undeclared_attribute_and_stray_text() {
        let doc = xml::parse(&format!(
            r#"<articles dtd-version="1.10" foo="x"><article {}><front>oops<title>t</title><pub-date pub-type="epub">2019</pub-date></front></article></articles>"#,
            GOOD_ATTRS
        ))
        .unwrap();
        assert_eq!(
            schema().validate(&doc),
            vec![
                "Element 'articles', attribute 'foo': The attribute 'foo' is not allowed.".to_string(),
                "Element 'front': Character content other than whitespace is not allowed because the content type is 'element-only'.".to_string(),
            ]
        );
    }

    #[test]
    fn unknown_root_has_no_declaration() {
        let doc = xml::parse("<foo/>").unwrap();
        assert_eq!(
            schema().validate(&doc),
            vec!["Element 'foo': No matching global declaration available for the validation root.".to_string()]
        );
    }

    #[test]
    fn complex_content_extension_appends_particles() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:complexType name="Base">
    <xs:sequence><xs:element name="a" type="xs:string"/></xs:sequence>
    <xs:attribute name="id" use="required"/>
  </xs:complexType>
  <xs:element name="root">
    <xs:complexType>
      <xs:complexContent>
        <xs:extension base="Base">
          <xs:sequence><xs:element name="b" type="xs:string"/></xs:sequence>
        </xs:extension>
      </xs:complexContent>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;
        let schema = XsdSchema::parse(xsd).unwrap();
        assert!(schema
            .validate(&xml::parse(r#"<root id="1"><a>x</a><b>y</b></root>"#).unwrap())
            .is_empty());
        assert_eq!(
            schema.validate(&xml::parse("<root><b>y</b></root>").unwrap()),
            vec![
                "Element 'root': The attribute 'id' is required but missing.".to_string(),
                "Element 'b': This element is not expected. Expected is ( a ).".to_string(),
            ]
        );
    }

    #[test]
    fn all_group_accepts_any_order() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="root">
    <xs:complexType>
      <xs:all>
        <xs:element name="a"/>
        <xs:element name="b"/>
        <xs:element name="c" minOccurs="0"/>
      </xs:all>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;
        let schema = XsdSchema::parse(xsd).unwrap();
        assert!(schema
            .validate(&xml::parse("<root><b/><a/></root>").unwrap())
            .is_empty());
        assert_eq!(
            schema.validate(&xml::parse("<root><c/></root>").unwrap()),
            vec!["Element 'root': Missing child element(s). Expected is one of ( a, b ).".to_string()]
        );
    }
    #[test]
    fn builtin_datatypes_are_checked() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="record">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="year" type="xs:integer"/>
        <xs:element name="issued" type="xs:date"/>
        <xs:element name="pages" type="xs:positiveInteger"/>
        <xs:element name="link" type="xs:anyURI"/>
      </xs:sequence>
      <xs:attribute name="open" type="xs:boolean"/>
      <xs:attribute name="lang" type="xs:language"/>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;
        let schema = XsdSchema::parse(xsd).unwrap();
        let good = r#"<record open="true" lang="pt-BR"><year> 2019 </year><issued>2020-02-29</issued><pages>12</pages><link>http://example.org/a%20b</link></record>"#;
        let errors = schema.validate(&xml::parse(good).unwrap());
        assert!(errors.is_empty(), "{:?}", errors);

        let bad = r#"<record open="yes" lang="toolonglanguage"><year>not-a-number</year><issued>2019-02-29</issued><pages>0</pages><link>http://example.org/%zz</link></record>"#;
        assert_eq!(
            schema.validate(&xml::parse(bad).unwrap()),
            vec![
                "Element 'record', attribute 'open': 'yes' is not a valid value of the atomic type 'xs:boolean'.".to_string(),
                "Element 'record', attribute 'lang': 'toolonglanguage' is not a valid value of the atomic type 'xs:language'.".to_string(),
                "Element 'year': 'not-a-number' is not a valid value of the atomic type 'xs:integer'.".to_string(),
                "Element 'issued': '2019-02-29' is not a valid value of the atomic type 'xs:date'.".to_string(),
                "Element 'pages': '0' is not a valid value of the atomic type 'xs:positiveInteger'.".to_string(),
                "Element 'link': 'http://example.org/%zz' is not a valid value of the atomic type 'xs:anyURI'.".to_string(),
            ]
        );
    }

    #[test]
    fn restriction_facets_are_checked_at_every_step() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:simpleType name="Issn">
    <xs:restriction base="xs:string">
      <xs:pattern value="\d{4}-\d{3}[\dX]"/>
    </xs:restriction>
  </xs:simpleType>
  <xs:simpleType name="Volume">
    <xs:restriction base="xs:int">
      <xs:minInclusive value="1"/>
      <xs:maxExclusive value="1000"/>
    </xs:restriction>
  </xs:simpleType>
  <xs:simpleType name="Code">
    <xs:restriction base="xs:token">
      <xs:minLength value="2"/>
      <xs:maxLength value="4"/>
    </xs:restriction>
  </xs:simpleType>
  <xs:simpleType name="Price">
    <xs:restriction base="xs:decimal">
      <xs:totalDigits value="5"/>
      <xs:fractionDigits value="2"/>
    </xs:restriction>
  </xs:simpleType>
  <xs:simpleType name="ShortCode">
    <xs:restriction base="Code">
      <xs:length value="2"/>
    </xs:restriction>
  </xs:simpleType>
  <xs:element name="journal">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="issn" type="Issn"/>
        <xs:element name="volume" type="Volume"/>
        <xs:element name="code" type="Code"/>
        <xs:element name="price" type="Price"/>
        <xs:element name="short" type="ShortCode"/>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;
        let schema = XsdSchema::parse(xsd).unwrap();
        let good = "<journal><issn>0001-037X</issn><volume>12</volume><code> AB </code><price>123.45</price><short>AB</short></journal>";
        let errors = schema.validate(&xml::parse(good).unwrap());
        assert!(errors.is_empty(), "{:?}", errors);

        let bad = "<journal><issn>1234-567</issn><volume>1000</volume><code>ABCDE</code><price>1234.567</price><short>ABC</short></journal>";
        assert_eq!(
            schema.validate(&xml::parse(bad).unwrap()),
            vec![
                r"Element 'issn': [facet 'pattern'] The value '1234-567' is not accepted by the pattern '\d{4}-\d{3}[\dX]'.".to_string(),
                "Element 'volume': [facet 'maxExclusive'] The value '1000' must be less than '1000'.".to_string(),
                "Element 'code': [facet 'maxLength'] The value 'ABCDE' has a length of '5'; this exceeds the allowed maximum length of '4'.".to_string(),
                "Element 'price': [facet 'totalDigits'] The value '1234.567' has more digits than are allowed ('5').".to_string(),
                "Element 'price': [facet 'fractionDigits'] The value '1234.567' has more fractional digits than are allowed ('2').".to_string(),
                "Element 'short': [facet 'length'] The value 'ABC' has a length of '3'; this differs from the allowed length of '2'.".to_string(),
            ]
        );
    }

    #[test]
    fn list_and_union_types() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:simpleType name="Years"><xs:list itemType="xs:gYear"/></xs:simpleType>
  <xs:simpleType name="FewYears">
    <xs:restriction base="Years"><xs:maxLength value="2"/></xs:restriction>
  </xs:simpleType>
  <xs:simpleType name="SizeOrAuto">
    <xs:union memberTypes="xs:positiveInteger">
      <xs:simpleType>
        <xs:restriction base="xs:string"><xs:enumeration value="auto"/></xs:restriction>
      </xs:simpleType>
    </xs:union>
  </xs:simpleType>
  <xs:element name="box">
    <xs:complexType>
      <xs:attribute name="years" type="FewYears"/>
      <xs:attribute name="size" type="SizeOrAuto"/>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;
        let schema = XsdSchema::parse(xsd).unwrap();
        assert!(schema
            .validate(&xml::parse(r#"<box years="2019  2020" size="auto"/>"#).unwrap())
            .is_empty());
        assert!(schema
            .validate(&xml::parse(r#"<box size="12"/>"#).unwrap())
            .is_empty());
        assert_eq!(
            schema.validate(&xml::parse(r#"<box years="2019 20x1" size="big"/>"#).unwrap()),
            vec![
                "Element 'box', attribute 'years': '20x1' is not a valid value of the atomic type 'xs:gYear'.".to_string(),
                "Element 'box', attribute 'size': 'big' is not a valid value of the union type.".to_string(),
            ]
        );
        assert_eq!(
            schema.validate(&xml::parse(r#"<box years="2019 2020 2021"/>"#).unwrap()),
            vec!["Element 'box', attribute 'years': [facet 'maxLength'] The value '2019 2020 2021' has a length of '3'; this exceeds the allowed maximum length of '2'.".to_string()]
        );
    }

    #[test]
    fn simple_content_restriction_keeps_base_datatype() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:complexType name="Count">
    <xs:simpleContent>
      <xs:extension base="xs:nonNegativeInteger">
        <xs:attribute name="unit" type="xs:string"/>
      </xs:extension>
    </xs:simpleContent>
  </xs:complexType>
  <xs:complexType name="SmallCount">
    <xs:simpleContent>
      <xs:restriction base="Count">
        <xs:maxInclusive value="10"/>
      </xs:restriction>
    </xs:simpleContent>
  </xs:complexType>
  <xs:element name="n" type="SmallCount"/>
</xs:schema>"#;
        let schema = XsdSchema::parse(xsd).unwrap();
        assert!(schema
            .validate(&xml::parse(r#"<n unit="pages">7</n>"#).unwrap())
            .is_empty());
        assert_eq!(
            schema.validate(&xml::parse("<n>11</n>").unwrap()),
            vec!["Element 'n': [facet 'maxInclusive'] The value '11' is greater than the maximum value allowed ('10').".to_string()]
        );
        assert_eq!(
            schema.validate(&xml::parse("<n>-1</n>").unwrap()),
            vec!["Element 'n': '-1' is not a valid value of the atomic type 'xs:nonNegativeInteger'.".to_string()]
        );
    }

    #[test]
    fn undefined_types_are_listed_and_left_unchecked() {
        let xsd = r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:include schemaLocation="common.xsd"/>
  <xs:element name="root">
    <xs:complexType>
      <xs:sequence><xs:element name="a" type="common:Code"/></xs:sequence>
      <xs:attribute name="kind" type="Kind"/>
    </xs:complexType>
  </xs:element>
</xs:schema>"#;
        let schema = XsdSchema::parse(xsd).unwrap();
        assert_eq!(
            schema.unresolved_types().into_iter().collect::<Vec<_>>(),
            vec!["Code".to_string(), "Kind".to_string()]
        );
        assert!(schema
            .validate(&xml::parse(r#"<root kind="x"><a>anything</a></root>"#).unwrap())
            .is_empty());
    }
}
