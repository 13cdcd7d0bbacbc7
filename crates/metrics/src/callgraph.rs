use facts::sources::is_entry_point;
use facts::{EntityId, EntityKind, FactModel, RelationKind};
use std::collections::{BTreeSet, HashMap};

/// 调用图中的函数节点
#[derive(Debug, Clone)]
pub struct FunctionNode {
    pub id: EntityId,
    /// 短名字 (用于入口点判断)
    pub name: String,
    /// 所属类型的短名字 (成员函数)
    pub owner: Option<String>,
    /// 是否有函数体
    pub defined: bool,
    pub callers: Vec<EntityId>,
    pub callees: Vec<EntityId>,
}

/// 项目内函数的调用图
///
/// 只包含非外部函数。函数指针引用也算作一次使用，
/// 因此被 `attachInterrupt(0, isr, RISING)` 之类引用的函数不会被当作死代码。
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    /// 函数映射: EntityId -> FunctionNode
    functions: HashMap<EntityId, FunctionNode>,
    /// 被引用 (而非调用) 的函数
    referenced: BTreeSet<EntityId>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从事实模型构建调用图
    pub fn from_model(model: &FactModel) -> Self {
        let mut graph = Self::new();

        for func in model.internal_of(EntityKind::Function) {
            let owner = model
                .incoming(func.id)
                .filter(|r| r.kind == RelationKind::Contains)
                .filter_map(|r| model.entity(r.source))
                .find(|e| e.kind == EntityKind::Type)
                .map(|e| e.short_name().to_string());

            graph.add_function(FunctionNode {
                id: func.id,
                name: func.short_name().to_string(),
                owner,
                defined: func.attr(facts::attr::LINES).is_some(),
                callers: Vec::new(),
                callees: Vec::new(),
            });
        }

        for rel in model.relations() {
            let both_internal =
                graph.functions.contains_key(&rel.source) && graph.functions.contains_key(&rel.target);
            match rel.kind {
                RelationKind::Calls if both_internal => graph.add_call(rel.source, rel.target),
                RelationKind::References if graph.functions.contains_key(&rel.target) => {
                    graph.referenced.insert(rel.target);
                }
                _ => {}
            }
        }

        graph
    }

    fn add_function(&mut self, node: FunctionNode) {
        self.functions.insert(node.id, node);
    }

    /// 添加调用边，重复的边只记录一次
    pub fn add_call(&mut self, caller: EntityId, callee: EntityId) {
        if let Some(node) = self.functions.get_mut(&caller) {
            if !node.callees.contains(&callee) {
                node.callees.push(callee);
            }
        }
        if let Some(node) = self.functions.get_mut(&callee) {
            if !node.callers.contains(&caller) {
                node.callers.push(caller);
            }
        }
    }

    /// 检测死代码 (有定义、无调用者、未被引用、非入口点)
    pub fn find_dead_code(&self) -> Vec<&FunctionNode> {
        let mut dead: Vec<&FunctionNode> = self
            .functions
            .values()
            .filter(|node| {
                node.defined
                    && node.callers.iter().all(|c| *c == node.id)
                    && !self.referenced.contains(&node.id)
                    && !Self::is_entry_point(node)
            })
            .collect();
        dead.sort_by_key(|n| n.id);
        dead
    }

    /// 判断是否是入口点
    ///
    /// Arduino 框架入口 (setup/loop/main)、中断处理函数 (ISR 命名约定)
    /// 以及构造/析构函数由运行时或编译器隐式调用。
    /// setup/loop/main 只对自由函数成立，`Motor::setup` 是普通方法。
    pub fn is_entry_point(node: &FunctionNode) -> bool {
        if node.owner.is_none() && is_entry_point(&node.name) {
            return true;
        }
        let name_lower = node.name.to_lowercase();
        if name_lower == "isr" || name_lower.ends_with("_isr") || name_lower.ends_with("_vect") {
            return true;
        }
        match &node.owner {
            Some(owner) => node.name == *owner || node.name.strip_prefix('~') == Some(owner.as_str()),
            None => false,
        }
    }

    /// 最长调用链的深度 (单个函数深度为 1)
    ///
    /// 在强连通分量的压缩图上计算: 一组互相递归的函数整体只走一次，
    /// 贡献其函数个数。结果与函数的声明顺序无关。
    pub fn max_call_depth(&self) -> usize {
        let components = self.strongly_connected();
        let mut component_of: HashMap<EntityId, usize> = HashMap::new();
        for (index, members) in components.iter().enumerate() {
            for id in members {
                component_of.insert(*id, index);
            }
        }

        // Tarjan 按逆拓扑序产出分量: 后继分量总是排在前面
        let mut depths = vec![0usize; components.len()];
        for (index, members) in components.iter().enumerate() {
            let deepest = members
                .iter()
                .filter_map(|id| self.functions.get(id))
                .flat_map(|node| node.callees.iter())
                .filter_map(|callee| component_of.get(callee))
                .filter(|&&c| c != index)
                .map(|&c| depths[c])
                .max()
                .unwrap_or(0);
            depths[index] = members.len() + deepest;
        }

        depths.into_iter().max().unwrap_or(0)
    }

    /// Tarjan 强连通分量
    fn strongly_connected(&self) -> Vec<Vec<EntityId>> {
        let mut ids: Vec<EntityId> = self.functions.keys().copied().collect();
        ids.sort();

        let mut tarjan = Tarjan::default();
        for id in ids {
            if !tarjan.index.contains_key(&id) {
                tarjan.visit(self, id);
            }
        }
        tarjan.components
    }

    /// 每个有定义函数的不同被调用函数数量
    pub fn fan_outs(&self) -> Vec<usize> {
        self.functions
            .values()
            .filter(|node| node.defined)
            .map(|node| node.callees.len())
            .collect()
    }

    /// 获取所有函数
    pub fn functions(&self) -> &HashMap<EntityId, FunctionNode> {
        &self.functions
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[derive(Default)]
struct Tarjan {
    next: usize,
    index: HashMap<EntityId, usize>,
    low: HashMap<EntityId, usize>,
    stack: Vec<EntityId>,
    on_stack: BTreeSet<EntityId>,
    components: Vec<Vec<EntityId>>,
}

impl Tarjan {
    fn visit(&mut self, graph: &CallGraph, id: EntityId) {
        self.index.insert(id, self.next);
        self.low.insert(id, self.next);
        self.next += 1;
        self.stack.push(id);
        self.on_stack.insert(id);

        if let Some(node) = graph.functions.get(&id) {
            for &callee in &node.callees {
                if !graph.functions.contains_key(&callee) {
                    continue;
                }
                if !self.index.contains_key(&callee) {
                    self.visit(graph, callee);
                    let low = self.low[&id].min(self.low[&callee]);
                    self.low.insert(id, low);
                } else if self.on_stack.contains(&callee) {
                    let low = self.low[&id].min(self.index[&callee]);
                    self.low.insert(id, low);
                }
            }
        }

        if self.low[&id] == self.index[&id] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.remove(&member);
                component.push(member);
                if member == id {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}
